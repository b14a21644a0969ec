//! ABOUTME: Shared testing utilities and helper functions
//! ABOUTME: Common test fixtures and mocks for all bk_* crates
//!
//! Deliberately dependency-free with respect to the rest of the workspace:
//! every other crate may use this one as a dev-dependency, so this crate
//! must never depend back on `bk_core` or any sibling.

use chrono::{DateTime, Utc};

/// Simple test helper to demonstrate cross-crate testing.
pub fn create_test_id() -> String {
    "test-id-123".to_string()
}

/// Helper for creating temporary directories in tests.
pub fn temp_dir_path() -> std::path::PathBuf {
    std::env::temp_dir().join("bk-test")
}

/// A clock that always returns the same instant, for deterministic
/// backoff/scheduling assertions that would otherwise be flaky against
/// wall-clock time.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    pub fn epoch_2024() -> Self {
        Self(
            "2024-01-01T00:00:00Z"
                .parse()
                .expect("literal timestamp is valid"),
        )
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.0
    }

    pub fn advance(&mut self, duration: chrono::Duration) {
        self.0 += duration;
    }
}

/// A representative task argument bundle: positional args plus a keyword
/// map, matching the tagged-value tree shape task handlers receive.
pub fn sample_args() -> serde_json::Value {
    serde_json::json!({
        "positional": ["alice", 42],
        "kwargs": {"retries": 3, "dry_run": false}
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_advances_deterministically() {
        let mut clock = FixedClock::epoch_2024();
        let before = clock.now();
        clock.advance(chrono::Duration::seconds(30));
        assert_eq!(clock.now() - before, chrono::Duration::seconds(30));
    }
}

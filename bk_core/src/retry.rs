use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A task's retry behavior: exponential backoff with optional jitter and a
/// hard ceiling, shared by `Queue::fail`'s retry computation and by the
/// reaper's crashed-worker compensation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_base_seconds: u64,
    pub backoff_factor: f64,
    pub jitter: bool,
    pub delay_ceiling_seconds: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_base_seconds: 1,
            backoff_factor: 2.0,
            jitter: true,
            delay_ceiling_seconds: 3600,
        }
    }
}

impl RetryPolicy {
    /// The deterministic delay before jitter: `base * factor^(attempt - 1)`,
    /// clamped to the ceiling.
    pub fn base_delay_seconds(&self, attempt: u32) -> f64 {
        let exponent = attempt.saturating_sub(1) as i32;
        let raw = self.delay_base_seconds as f64 * self.backoff_factor.powi(exponent);
        raw.min(self.delay_ceiling_seconds as f64)
    }

    /// `available_at` for the next retry, applying a uniform jitter in
    /// [0.5, 1.5] when enabled, still clamped to the ceiling.
    pub fn next_available_at(&self, now: DateTime<Utc>, attempt: u32) -> DateTime<Utc> {
        let mut delay = self.base_delay_seconds(attempt);
        if self.jitter {
            let factor = rand::thread_rng().gen_range(0.5..=1.5);
            delay = (delay * factor).min(self.delay_ceiling_seconds as f64);
        }
        now + Duration::milliseconds((delay * 1000.0).round() as i64)
    }

    /// Whether `attempt` has exhausted the configured retry budget.
    /// Invariant (3): attempt <= max_attempts + 1 at all times.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

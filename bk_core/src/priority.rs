use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Job priority. Lower numeric rank is reserved first; ordering is strict,
/// not weighted — a CRITICAL job always preempts a HIGH one regardless of
/// how long the HIGH job has been waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    Critical,
    High,
    Normal,
    Low,
}

impl Priority {
    /// Numeric rank used for ordering; lower wins.
    pub fn rank(self) -> u8 {
        match self {
            Priority::Critical => 0,
            Priority::High => 10,
            Priority::Normal => 20,
            Priority::Low => 30,
        }
    }

    /// The stable API name for this priority. These strings are a stable
    /// external contract (spec.md §6) — never rename them.
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Critical => "CRITICAL",
            Priority::High => "HIGH",
            Priority::Normal => "NORMAL",
            Priority::Low => "LOW",
        }
    }

    pub fn all() -> [Priority; 4] {
        [
            Priority::Critical,
            Priority::High,
            Priority::Normal,
            Priority::Low,
        ]
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CRITICAL" => Ok(Priority::Critical),
            "HIGH" => Ok(Priority::High),
            "NORMAL" => Ok(Priority::Normal),
            "LOW" => Ok(Priority::Low),
            other => Err(crate::Error::Validation(format!(
                "unknown priority: {other}"
            ))),
        }
    }
}

/// The subset of priority levels a worker is willing to reserve, enabling
/// fleet specialization (e.g. a pool dedicated to CRITICAL work).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityFilter(BTreeSet<Priority>);

impl PriorityFilter {
    /// Accept every priority level.
    pub fn all() -> Self {
        Self(Priority::all().into_iter().collect())
    }

    /// Accept only the given levels.
    pub fn only(levels: impl IntoIterator<Item = Priority>) -> Self {
        Self(levels.into_iter().collect())
    }

    pub fn accepts(&self, priority: Priority) -> bool {
        self.0.contains(&priority)
    }
}

impl Default for PriorityFilter {
    fn default() -> Self {
        Self::all()
    }
}

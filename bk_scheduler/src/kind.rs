//! The seven schedule kinds and their stable wire names.

use bk_core::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// How a schedule's `next_fire_at` is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduleKind {
    Cron,
    Interval,
    OneShot,
    Daily,
    Weekly,
    Monthly,
    Event,
}

impl ScheduleKind {
    /// The stable API name for this kind, persisted as `ScheduleRow::kind`.
    pub fn as_str(self) -> &'static str {
        match self {
            ScheduleKind::Cron => "CRON",
            ScheduleKind::Interval => "INTERVAL",
            ScheduleKind::OneShot => "ONE_SHOT",
            ScheduleKind::Daily => "DAILY",
            ScheduleKind::Weekly => "WEEKLY",
            ScheduleKind::Monthly => "MONTHLY",
            ScheduleKind::Event => "EVENT",
        }
    }

    /// Whether this kind ever recomputes a `next_fire_at` on its own, as
    /// opposed to relying solely on external triggering (`EVENT`) or firing
    /// exactly once (`ONE_SHOT`, after which it goes null).
    pub fn is_recurring(self) -> bool {
        !matches!(self, ScheduleKind::OneShot | ScheduleKind::Event)
    }
}

impl fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ScheduleKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "CRON" => Ok(ScheduleKind::Cron),
            "INTERVAL" => Ok(ScheduleKind::Interval),
            "ONE_SHOT" => Ok(ScheduleKind::OneShot),
            "DAILY" => Ok(ScheduleKind::Daily),
            "WEEKLY" => Ok(ScheduleKind::Weekly),
            "MONTHLY" => Ok(ScheduleKind::Monthly),
            "EVENT" => Ok(ScheduleKind::Event),
            other => Err(Error::Validation(format!("unknown schedule kind: {other}"))),
        }
    }
}

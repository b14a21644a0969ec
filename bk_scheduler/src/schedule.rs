//! The domain `Schedule` type and the per-kind next-fire computation.

use crate::kind::ScheduleKind;
use bk_core::{ArgBundle, Error, Id, Priority, Result};
use bk_storage::ScheduleRow;
use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Utc};
use std::str::FromStr;

/// A schedule as `Scheduler` callers see it: richer types than the wire row,
/// mirroring the split `bk_queue::Job` keeps from `JobRow`.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    pub id: Id,
    pub name: String,
    pub task_name: String,
    pub task_version: Option<String>,
    pub queue_name: String,
    pub priority: Priority,
    pub kind: ScheduleKind,
    pub cron_expression: Option<String>,
    pub interval_seconds: Option<i64>,
    pub anchor_at: Option<DateTime<Utc>>,
    pub times_of_day: Vec<String>,
    pub days_of_week: Vec<u8>,
    pub days_of_month: Vec<u8>,
    pub event_topic: Option<String>,
    pub timezone: String,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub enabled: bool,
    pub unique_instance: bool,
    pub args: ArgBundle,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub tags: Vec<String>,
    pub last_fire_at: Option<DateTime<Utc>>,
    pub next_fire_at: Option<DateTime<Utc>>,
    pub run_count: i64,
    pub success_count: i64,
    pub error_count: i64,
    pub skipped_count: i64,
    pub lock_holder_id: Option<String>,
    pub lock_deadline: Option<DateTime<Utc>>,
    pub version: i64,
}

impl Schedule {
    pub fn from_row(row: ScheduleRow) -> Result<Self> {
        let priority = Priority::from_str(&row.priority)?;
        let kind = ScheduleKind::from_str(&row.kind)?;
        let metadata = match row.metadata {
            serde_json::Value::Object(m) => m,
            _ => serde_json::Map::new(),
        };
        Ok(Self {
            id: Id::from_str(&row.id).map_err(|e| Error::Fatal(format!("malformed schedule id: {e}")))?,
            name: row.name,
            task_name: row.task_name,
            task_version: row.task_version,
            queue_name: row.queue_name,
            priority,
            kind,
            cron_expression: row.cron_expression,
            interval_seconds: row.interval_seconds,
            anchor_at: row.anchor_at,
            times_of_day: row.times_of_day,
            days_of_week: row.days_of_week,
            days_of_month: row.days_of_month,
            event_topic: row.event_topic,
            timezone: row.timezone,
            start_at: row.start_at,
            end_at: row.end_at,
            enabled: row.enabled,
            unique_instance: row.unique_instance,
            args: ArgBundle::from_row_values(row.args_positional, row.args_kwargs),
            metadata,
            tags: row.tags,
            last_fire_at: row.last_fire_at,
            next_fire_at: row.next_fire_at,
            run_count: row.run_count,
            success_count: row.success_count,
            error_count: row.error_count,
            skipped_count: row.skipped_count,
            lock_holder_id: row.lock_holder_id,
            lock_deadline: row.lock_deadline,
            version: row.version,
        })
    }

    pub fn to_row(&self) -> ScheduleRow {
        let (args_positional, args_kwargs) = self.args.to_row_values();
        ScheduleRow {
            id: self.id.to_string(),
            name: self.name.clone(),
            task_name: self.task_name.clone(),
            task_version: self.task_version.clone(),
            queue_name: self.queue_name.clone(),
            priority: self.priority.as_str().to_string(),
            kind: self.kind.as_str().to_string(),
            cron_expression: self.cron_expression.clone(),
            interval_seconds: self.interval_seconds,
            anchor_at: self.anchor_at,
            times_of_day: self.times_of_day.clone(),
            days_of_week: self.days_of_week.clone(),
            days_of_month: self.days_of_month.clone(),
            event_topic: self.event_topic.clone(),
            timezone: self.timezone.clone(),
            start_at: self.start_at,
            end_at: self.end_at,
            enabled: self.enabled,
            unique_instance: self.unique_instance,
            args_positional,
            args_kwargs,
            metadata: serde_json::Value::Object(self.metadata.clone()),
            tags: self.tags.clone(),
            last_fire_at: self.last_fire_at,
            next_fire_at: self.next_fire_at,
            run_count: self.run_count,
            success_count: self.success_count,
            error_count: self.error_count,
            skipped_count: self.skipped_count,
            lock_holder_id: self.lock_holder_id.clone(),
            lock_deadline: self.lock_deadline,
            version: self.version,
        }
    }

    fn tz(&self) -> Result<chrono_tz::Tz> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|e| Error::Validation(format!("invalid schedule timezone '{}': {e}", self.timezone)))
    }

    fn parsed_times_of_day(&self) -> Result<Vec<NaiveTime>> {
        self.times_of_day
            .iter()
            .map(|s| {
                NaiveTime::parse_from_str(s, "%H:%M:%S")
                    .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
                    .map_err(|e| Error::Validation(format!("invalid time-of-day '{s}': {e}")))
            })
            .collect()
    }

    /// The next instant this schedule should fire strictly after `after`,
    /// honoring `start_at`/`end_at`/`enabled`. `None` means this schedule has
    /// no further automatic fires (disabled, exhausted, `ONE_SHOT` already
    /// fired, or `EVENT`).
    pub fn compute_next_fire(&self, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        if !self.enabled {
            return Ok(None);
        }
        let floor = match self.start_at {
            Some(s) if s > after => s - chrono::Duration::milliseconds(1),
            _ => after,
        };
        let raw = self.raw_next_fire(floor)?;
        Ok(raw.filter(|t| self.end_at.map_or(true, |e| *t <= e)))
    }

    fn raw_next_fire(&self, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        match self.kind {
            ScheduleKind::Cron => self.next_cron_fire(after),
            ScheduleKind::Interval => Ok(self.next_interval_fire(after)),
            ScheduleKind::OneShot => Ok(if self.last_fire_at.is_some() {
                None
            } else {
                self.anchor_at
            }),
            ScheduleKind::Daily => self.find_from_calendar(after, |_| true),
            ScheduleKind::Weekly => {
                let days = self.days_of_week.clone();
                self.find_from_calendar(after, move |d| {
                    days.contains(&(d.weekday().num_days_from_sunday() as u8))
                })
            }
            ScheduleKind::Monthly => {
                let days = self.days_of_month.clone();
                self.find_from_calendar(after, move |d| days.contains(&(d.day() as u8)))
            }
            ScheduleKind::Event => Ok(None),
        }
    }

    fn next_cron_fire(&self, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let expr = self
            .cron_expression
            .as_deref()
            .ok_or_else(|| Error::Validation("CRON schedule missing cron_expression".into()))?;
        // The `cron` crate expects a seconds-first six-field expression; the
        // stable API surface accepts the standard five-field form.
        let six_field = format!("0 {expr}");
        let schedule = cron::Schedule::from_str(&six_field)
            .map_err(|e| Error::Validation(format!("invalid cron expression '{expr}': {e}")))?;
        let tz = self.tz()?;
        let after_in_tz = after.with_timezone(&tz);
        Ok(schedule.after(&after_in_tz).next().map(|t| t.with_timezone(&Utc)))
    }

    fn next_interval_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let interval_seconds = self.interval_seconds?;
        if interval_seconds <= 0 {
            return None;
        }
        let interval = chrono::Duration::seconds(interval_seconds);
        let mut candidate = match self.last_fire_at {
            Some(last) => last + interval,
            None => self.anchor_at.unwrap_or(after) + interval,
        };
        while candidate <= after {
            candidate += interval;
        }
        Some(candidate)
    }

    fn find_from_calendar(
        &self,
        after: DateTime<Utc>,
        day_filter: impl Fn(chrono::NaiveDate) -> bool,
    ) -> Result<Option<DateTime<Utc>>> {
        let times = self.parsed_times_of_day()?;
        if times.is_empty() {
            return Ok(None);
        }
        let tz = self.tz()?;
        let after_in_tz = after.with_timezone(&tz);
        let mut date = after_in_tz.date_naive();
        for _ in 0..400 {
            if day_filter(date) {
                let mut best: Option<DateTime<chrono_tz::Tz>> = None;
                for t in &times {
                    let naive = date.and_time(*t);
                    if let Some(candidate) = tz.from_local_datetime(&naive).earliest() {
                        if candidate > after_in_tz {
                            best = Some(match best {
                                Some(b) if b <= candidate => b,
                                _ => candidate,
                            });
                        }
                    }
                }
                if let Some(b) = best {
                    return Ok(Some(b.with_timezone(&Utc)));
                }
            }
            date = match date.succ_opt() {
                Some(d) => d,
                None => break,
            };
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;

    fn base() -> Schedule {
        Schedule {
            id: Id::new(),
            name: "test".into(),
            task_name: "noop".into(),
            task_version: None,
            queue_name: "default".into(),
            priority: Priority::Normal,
            kind: ScheduleKind::Cron,
            cron_expression: None,
            interval_seconds: None,
            anchor_at: None,
            times_of_day: vec![],
            days_of_week: vec![],
            days_of_month: vec![],
            event_topic: None,
            timezone: "UTC".into(),
            start_at: None,
            end_at: None,
            enabled: true,
            unique_instance: false,
            args: ArgBundle::new(),
            metadata: serde_json::Map::new(),
            tags: vec![],
            last_fire_at: None,
            next_fire_at: None,
            run_count: 0,
            success_count: 0,
            error_count: 0,
            skipped_count: 0,
            lock_holder_id: None,
            lock_deadline: None,
            version: 0,
        }
    }

    #[test]
    fn cron_computes_next_five_minute_boundary() {
        let mut s = base();
        s.cron_expression = Some("*/5 * * * *".into());
        let after = Utc.with_ymd_and_hms(2024, 1, 1, 10, 2, 0).unwrap();
        let next = s.compute_next_fire(after).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 10, 5, 0).unwrap());
    }

    #[test]
    fn interval_first_fire_uses_anchor() {
        let mut s = base();
        s.kind = ScheduleKind::Interval;
        s.interval_seconds = Some(60);
        let anchor = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        s.anchor_at = Some(anchor);
        let after = Utc.with_ymd_and_hms(2023, 12, 31, 0, 0, 0).unwrap();
        let next = s.compute_next_fire(after).unwrap().unwrap();
        assert_eq!(next, anchor + chrono::Duration::seconds(60));
    }

    #[test]
    fn interval_subsequent_fire_uses_last_fire() {
        let mut s = base();
        s.kind = ScheduleKind::Interval;
        s.interval_seconds = Some(60);
        s.last_fire_at = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let after = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 30).unwrap();
        let next = s.compute_next_fire(after).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap());
    }

    #[test]
    fn one_shot_fires_once_then_goes_null() {
        let mut s = base();
        s.kind = ScheduleKind::OneShot;
        let anchor = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        s.anchor_at = Some(anchor);
        let after = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(s.compute_next_fire(after).unwrap(), Some(anchor));

        s.last_fire_at = Some(anchor);
        assert_eq!(s.compute_next_fire(after).unwrap(), None);
    }

    #[test]
    fn daily_advances_to_next_configured_time() {
        let mut s = base();
        s.kind = ScheduleKind::Daily;
        s.times_of_day = vec!["09:00".into()];
        let after = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let next = s.compute_next_fire(after).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap());
    }

    #[test]
    fn weekly_picks_matching_weekday() {
        let mut s = base();
        s.kind = ScheduleKind::Weekly;
        s.times_of_day = vec!["00:00".into()];
        s.days_of_week = vec![1]; // Monday
        let after = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(); // a Monday
        let next = s.compute_next_fire(after).unwrap().unwrap();
        assert_eq!(next.weekday(), chrono::Weekday::Mon);
        assert!(next > after);
    }

    #[test]
    fn monthly_picks_matching_day_of_month() {
        let mut s = base();
        s.kind = ScheduleKind::Monthly;
        s.times_of_day = vec!["00:00".into()];
        s.days_of_month = vec![1];
        let after = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let next = s.compute_next_fire(after).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn event_schedule_never_self_fires() {
        let mut s = base();
        s.kind = ScheduleKind::Event;
        s.event_topic = Some("orders.created".into());
        let after = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(s.compute_next_fire(after).unwrap(), None);
    }

    #[test]
    fn disabled_schedule_never_fires() {
        let mut s = base();
        s.cron_expression = Some("* * * * *".into());
        s.enabled = false;
        let after = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(s.compute_next_fire(after).unwrap(), None);
    }

    #[test]
    fn end_at_exhausts_the_schedule() {
        let mut s = base();
        s.cron_expression = Some("*/5 * * * *".into());
        s.end_at = Some(Utc.with_ymd_and_hms(2024, 1, 1, 10, 3, 0).unwrap());
        let after = Utc.with_ymd_and_hms(2024, 1, 1, 10, 2, 0).unwrap();
        assert_eq!(s.compute_next_fire(after).unwrap(), None);
    }
}

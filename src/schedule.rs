//! Delivery slot selection.
//!
//! Slots are computed in a fixed local offset. A slot never falls inside the
//! quiet window and is at least `spacing` after the latest slot already taken.
use chrono::{
    DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, Timelike, Utc,
};
use thiserror::Error;

use crate::config;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("invalid timestamp '{0}': expected RFC 3339 or ISO-8601 local time")]
    InvalidTimestamp(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPolicy {
    pub offset: FixedOffset,
    pub quiet_start_hour: u32,
    pub quiet_end_hour: u32,
    pub spacing: Duration,
    pub lookback: Duration,
}

impl Default for SlotPolicy {
    fn default() -> Self {
        Self {
            offset: hours_offset(3),
            quiet_start_hour: 20,
            quiet_end_hour: 10,
            spacing: Duration::hours(1),
            lookback: Duration::hours(24),
        }
    }
}

fn hours_offset(hours: i32) -> FixedOffset {
    FixedOffset::east_opt(hours * 3600).unwrap_or_else(|| Utc.fix())
}

impl SlotPolicy {
    pub fn from_config(app: &config::App, schedule: &config::Schedule) -> Self {
        Self {
            offset: hours_offset(app.utc_offset_hours),
            quiet_start_hour: schedule.quiet_start_hour,
            quiet_end_hour: schedule.quiet_end_hour,
            spacing: Duration::minutes(i64::from(schedule.spacing_minutes)),
            lookback: Duration::hours(i64::from(schedule.lookback_hours)),
        }
    }

    /// Whether `hour` (local) is inside `[quiet_start_hour, quiet_end_hour)`.
    pub fn is_quiet(&self, hour: u32) -> bool {
        let (start, end) = (self.quiet_start_hour, self.quiet_end_hour);
        if start == end {
            false
        } else if start > end {
            hour >= start || hour < end
        } else {
            hour >= start && hour < end
        }
    }

    /// Next permissible delivery time given `now` and the latest slot already
    /// scheduled inside the lookback window.
    pub fn next_slot(
        &self,
        now: DateTime<Utc>,
        last_scheduled: Option<DateTime<Utc>>,
    ) -> DateTime<FixedOffset> {
        let now = now.with_timezone(&self.offset);

        let mut slot = if self.is_quiet(now.hour()) {
            self.roll_out_of_quiet(now)
        } else {
            self.top_of_hour(now + Duration::hours(1))
        };

        if let Some(last) = last_scheduled {
            let earliest = last.with_timezone(&self.offset) + self.spacing;
            if slot < earliest {
                slot = earliest;
            }
        }

        if self.is_quiet(slot.hour()) {
            slot = self.roll_out_of_quiet(slot);
        }
        slot
    }

    /// First quiet-window end at or after `t`.
    fn roll_out_of_quiet(&self, t: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        let date = t.date_naive();
        let evening = self.quiet_start_hour > self.quiet_end_hour && t.hour() >= self.quiet_start_hour;
        let date = if evening { date + Duration::days(1) } else { date };
        self.at_hour(date, self.quiet_end_hour)
    }

    fn top_of_hour(&self, t: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        self.at_hour(t.date_naive(), t.hour())
    }

    fn at_hour(&self, date: NaiveDate, hour: u32) -> DateTime<FixedOffset> {
        let local = date.and_time(NaiveTime::MIN) + Duration::hours(i64::from(hour));
        self.localize(local)
    }

    fn localize(&self, local: NaiveDateTime) -> DateTime<FixedOffset> {
        let utc = local - Duration::seconds(i64::from(self.offset.local_minus_utc()));
        DateTime::from_naive_utc_and_offset(utc, self.offset)
    }

    /// Parse an RFC 3339 timestamp, or a naive ISO-8601 one taken as local time.
    /// Anything else is rejected.
    pub fn parse_timestamp(&self, raw: &str) -> Result<DateTime<Utc>, ScheduleError> {
        let trimmed = raw.trim();
        if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(ts.with_timezone(&Utc));
        }
        for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
            if let Ok(local) = NaiveDateTime::parse_from_str(trimmed, fmt) {
                return Ok(self.localize(local).with_timezone(&Utc));
            }
        }
        Err(ScheduleError::InvalidTimestamp(raw.to_string()))
    }
}

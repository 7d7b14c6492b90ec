//! Working-hours arithmetic.
//!
//! Working windows are interpreted in UTC and weekends are skipped. When
//! overtime is allowed the calendar is continuous and no snapping happens.

use crate::task::types::{SchedulingConstraint, SchedulingError};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};

/// Upper bound on days walked before giving up on a placement
pub const MAX_CALENDAR_DAYS: u32 = 3660;

#[derive(Clone, Debug, PartialEq)]
pub struct WorkingCalendar {
    /// Seconds after midnight at which the working window opens
    window_start: i64,
    /// Seconds after midnight at which the usable window closes
    window_end: i64,
    allow_overtime: bool,
}

impl WorkingCalendar {
    /// Build from normalized constraints. The usable window is capped by `max_daily_hours`.
    pub fn from_constraint(constraint: &SchedulingConstraint) -> Self {
        let window_start = constraint.working_hours_start as i64 * 3600;
        let working_end = constraint.working_hours_end as i64 * 3600;
        let daily_cap = (constraint.max_daily_hours * 3600.0).round() as i64;

        Self {
            window_start,
            window_end: working_end.min(window_start + daily_cap.max(1)),
            allow_overtime: constraint.allow_overtime,
        }
    }

    /// Calendar with no working-hours restriction
    pub fn continuous() -> Self {
        Self {
            window_start: 0,
            window_end: 86_400,
            allow_overtime: true,
        }
    }

    /// Length of the usable daily window in seconds
    pub fn window_seconds(&self) -> i64 {
        self.window_end - self.window_start
    }

    /// Earliest working instant at or after `at`
    pub fn snap_forward(&self, at: DateTime<Utc>) -> Result<DateTime<Utc>, SchedulingError> {
        if self.allow_overtime {
            return Ok(at);
        }

        let mut day = at.date_naive();
        let mut second_of_day = seconds_since_midnight(at);
        for _ in 0..=MAX_CALENDAR_DAYS {
            if !is_weekend(day) {
                if second_of_day < self.window_start {
                    return at_offset(day, self.window_start);
                }
                if second_of_day < self.window_end {
                    return Ok(at.max(at_offset(day, self.window_start)?));
                }
            }
            day = day.succ_opt().ok_or_else(calendar_overflow)?;
            second_of_day = 0;
        }

        Err(SchedulingError::SchedulingFailure(format!(
            "no working window within {} days of {}",
            MAX_CALENDAR_DAYS, at
        )))
    }

    /// Instant at which `seconds` of working time starting at `start` are used up
    pub fn add_working_time(
        &self,
        start: DateTime<Utc>,
        seconds: i64,
    ) -> Result<DateTime<Utc>, SchedulingError> {
        let seconds = seconds.max(0);
        if self.allow_overtime {
            let delta = Duration::try_seconds(seconds).ok_or_else(calendar_overflow)?;
            return start.checked_add_signed(delta).ok_or_else(calendar_overflow);
        }

        let mut cursor = self.snap_forward(start)?;
        let mut remaining = seconds;
        for _ in 0..=MAX_CALENDAR_DAYS {
            let day = cursor.date_naive();
            let available = self.window_end - seconds_since_midnight(cursor);
            if remaining <= available {
                return Ok(cursor + Duration::seconds(remaining));
            }
            remaining -= available;
            cursor = self.snap_forward(at_offset(day, self.window_end)?)?;
        }

        Err(SchedulingError::SchedulingFailure(format!(
            "{}s of work starting {} exceeds the {}-day planning horizon",
            seconds, start, MAX_CALENDAR_DAYS
        )))
    }
}

fn seconds_since_midnight(at: DateTime<Utc>) -> i64 {
    at.signed_duration_since(at.date_naive().and_time(NaiveTime::MIN).and_utc())
        .num_seconds()
}

fn at_offset(day: NaiveDate, seconds: i64) -> Result<DateTime<Utc>, SchedulingError> {
    day.and_time(NaiveTime::MIN)
        .and_utc()
        .checked_add_signed(Duration::seconds(seconds))
        .ok_or_else(calendar_overflow)
}

fn is_weekend(day: NaiveDate) -> bool {
    matches!(day.weekday(), Weekday::Sat | Weekday::Sun)
}

fn calendar_overflow() -> SchedulingError {
    SchedulingError::SchedulingFailure("calendar arithmetic overflowed".to_string())
}

//! Clock abstraction
//!
//! Every date comparison in the billing core (refund window, grace period, reminder
//! lead time) reads the current time through [`Clock`] so tests can pin it.

use std::sync::Mutex;

use time::{util::days_in_year_month, Date, Duration, OffsetDateTime};

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// Wall clock (UTC)
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Manually driven clock for tests and replays
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<OffsetDateTime>,
}

impl FixedClock {
    pub fn new(now: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: OffsetDateTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Add calendar months, clamping the day to the end of the target month.
///
/// Returns `None` only when the result falls outside the supported date range.
pub fn add_months(at: OffsetDateTime, months: u32) -> Option<OffsetDateTime> {
    let date = at.date();
    let month_index = u32::from(u8::from(date.month())) - 1 + months;
    let year = date.year().checked_add(i32::try_from(month_index / 12).ok()?)?;
    let month = date.month().nth_next((months % 12) as u8);
    let day = date.day().min(days_in_year_month(year, month));

    let new_date = Date::from_calendar_date(year, month, day).ok()?;
    Some(at.replace_date(new_date))
}

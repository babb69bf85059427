//! Recurrence expansion.
//!
//! The next occurrence is a pure function of the previous *scheduled*
//! time, never of when the previous run actually finished, so a slow or
//! delayed dispatch does not drift the series.

use chrono::{DateTime, Duration, Months, Utc};

use blastline_store::{Recurrence, RecurrencePattern};

/// Next scheduled time after `previous`, or `None` when the series has
/// ended. Monthly steps use calendar months and clamp to month end
/// (Jan 31 + 1 month is Feb 28/29).
pub fn next_occurrence(
    previous: DateTime<Utc>,
    recurrence: &Recurrence,
) -> Option<DateTime<Utc>> {
    let interval = recurrence.interval.max(1);
    let next = match recurrence.pattern {
        RecurrencePattern::Daily => previous + Duration::days(interval as i64),
        RecurrencePattern::Weekly => previous + Duration::days(7 * interval as i64),
        RecurrencePattern::Monthly => previous.checked_add_months(Months::new(interval))?,
    };
    match recurrence.end_date {
        Some(end) if next > end => None,
        _ => Some(next),
    }
}

//! Quota-reset calendar handling.
//!
//! The remote photo service resets its daily request quota at midnight US
//! Pacific time, not at UTC midnight and not at the host's local midnight.
//! All daily-window decisions go through this module so the boundary is
//! DST-correct (PST/PDT transitions are handled by the tz database).

use chrono::{DateTime, SecondsFormat, Utc};
use chrono_tz::Tz;

/// Timezone in which the remote service's daily quota window rolls over.
pub const QUOTA_RESET_TZ: Tz = chrono_tz::America::Los_Angeles;

/// Current instant in UTC.
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Calendar date (YYYY-MM-DD) of the given instant in the quota-reset timezone.
pub fn quota_date_of(instant: DateTime<Utc>) -> String {
    instant
        .with_timezone(&QUOTA_RESET_TZ)
        .format("%Y-%m-%d")
        .to_string()
}

/// Today's calendar date in the quota-reset timezone.
pub fn quota_date_today() -> String {
    quota_date_of(now_utc())
}

/// The given instant rendered in the quota-reset timezone with its UTC offset.
pub fn quota_time_of(instant: DateTime<Utc>) -> String {
    instant
        .with_timezone(&QUOTA_RESET_TZ)
        .to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// Check whether the quota-reset date has moved past `stored_date`.
///
/// Returns `Some(current_date)` if the stored date no longer matches today's
/// date in the quota-reset timezone, `None` otherwise.
pub fn quota_date_rolled(stored_date: &str) -> Option<String> {
    let current = quota_date_today();
    if stored_date != current {
        Some(current)
    } else {
        None
    }
}

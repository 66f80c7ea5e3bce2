//! Cron expression parsing and DST-correct next-run computation (§6:
//! "Five-field standard cron in a named IANA timezone. Next-run
//! computation honors DST.").

use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;

use crate::error::SchedulerError;

/// Compute the next fire time strictly after `after`, evaluated in
/// `timezone` so DST transitions land correctly, then converted back to
/// UTC for storage.
pub fn next_fire(expression: &str, timezone: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, SchedulerError> {
    let schedule = Schedule::from_str(expression).map_err(|e| SchedulerError::InvalidCron(e.to_string()))?;
    let tz: Tz = timezone.parse().map_err(|_| SchedulerError::InvalidTimezone(timezone.to_owned()))?;

    let after_in_tz = after.with_timezone(&tz);
    let next = schedule
        .after(&after_in_tz)
        .next()
        .ok_or_else(|| SchedulerError::InvalidCron(format!("`{expression}` has no future occurrence after {after}")))?;

    Ok(next.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn hourly_schedule_fires_on_the_hour() {
        let after = Utc.with_ymd_and_hms(2026, 1, 1, 10, 15, 0).unwrap();
        let next = next_fire("0 0 * * * *", "UTC", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 11, 0, 0).unwrap());
    }

    #[test]
    fn daily_schedule_honors_named_timezone() {
        // 09:00 America/New_York == 14:00 UTC outside DST (standard time).
        let after = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let next = next_fire("0 0 9 * * *", "America/New_York", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 14, 0, 0).unwrap());
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        let after = Utc::now();
        let result = next_fire("0 0 * * * *", "Nowhere/Imaginary", after);
        assert!(matches!(result, Err(SchedulerError::InvalidTimezone(_))));
    }

    #[test]
    fn malformed_expression_is_rejected() {
        let after = Utc::now();
        let result = next_fire("not a cron expression", "UTC", after);
        assert!(matches!(result, Err(SchedulerError::InvalidCron(_))));
    }
}

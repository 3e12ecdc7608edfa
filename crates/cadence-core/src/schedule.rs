//! Schedule computation for interval and cron triggers.
//!
//! Pure next-occurrence math used by the trigger layer to decide when a
//! scheduled step or workflow fires next. Interval schedules advance by a
//! fixed duration; cron schedules are parsed with `croner`.

use cadence_types::step::Schedule;
use chrono::{DateTime, Duration, Utc};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur computing schedule occurrences.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    /// Cron expression failed to parse.
    #[error("invalid cron expression '{expression}': {message}")]
    InvalidCron { expression: String, message: String },

    /// Interval of zero length.
    #[error("interval must be greater than zero")]
    ZeroInterval,
}

// ---------------------------------------------------------------------------
// Occurrence computation
// ---------------------------------------------------------------------------

/// Compute the next time a schedule fires strictly after `after`.
pub fn next_occurrence(
    schedule: &Schedule,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>, ScheduleError> {
    match schedule {
        Schedule::Interval { every, unit } => {
            if *every == 0 {
                return Err(ScheduleError::ZeroInterval);
            }
            let span = Duration::seconds((*every * unit.seconds()) as i64);
            Ok(after + span)
        }
        Schedule::Cron { expression } => {
            let cron =
                expression
                    .parse::<croner::Cron>()
                    .map_err(|e| ScheduleError::InvalidCron {
                        expression: expression.clone(),
                        message: e.to_string(),
                    })?;
            cron.iter_after(after)
                .next()
                .ok_or_else(|| ScheduleError::InvalidCron {
                    expression: expression.clone(),
                    message: "no future occurrence".to_string(),
                })
        }
    }
}

/// Whether a schedule is due at `now`, given the last time it fired.
///
/// A schedule that never fired is due immediately.
pub fn is_due(
    schedule: &Schedule,
    last_fired: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<bool, ScheduleError> {
    match last_fired {
        None => Ok(true),
        Some(last) => Ok(next_occurrence(schedule, last)? <= now),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_types::step::TimeUnit;
    use chrono::TimeZone;

    #[test]
    fn test_interval_next_occurrence() {
        let after = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let schedule = Schedule::Interval {
            every: 15,
            unit: TimeUnit::Minutes,
        };
        let next = next_occurrence(&schedule, after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 1, 12, 15, 0).unwrap());
    }

    #[test]
    fn test_interval_hours() {
        let after = Utc.with_ymd_and_hms(2026, 3, 1, 22, 0, 0).unwrap();
        let schedule = Schedule::Interval {
            every: 6,
            unit: TimeUnit::Hours,
        };
        let next = next_occurrence(&schedule, after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 2, 4, 0, 0).unwrap());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let schedule = Schedule::Interval {
            every: 0,
            unit: TimeUnit::Seconds,
        };
        let err = next_occurrence(&schedule, Utc::now()).unwrap_err();
        assert!(matches!(err, ScheduleError::ZeroInterval));
    }

    #[test]
    fn test_cron_next_occurrence() {
        // Daily at 02:30.
        let after = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let schedule = Schedule::Cron {
            expression: "30 2 * * *".to_string(),
        };
        let next = next_occurrence(&schedule, after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 2, 2, 30, 0).unwrap());
    }

    #[test]
    fn test_cron_invalid_expression() {
        let schedule = Schedule::Cron {
            expression: "not a cron".to_string(),
        };
        let err = next_occurrence(&schedule, Utc::now()).unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidCron { .. }));
    }

    #[test]
    fn test_is_due() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let schedule = Schedule::Interval {
            every: 10,
            unit: TimeUnit::Minutes,
        };

        // Never fired: due.
        assert!(is_due(&schedule, None, now).unwrap());

        // Fired 5 minutes ago: not due yet.
        let last = now - Duration::minutes(5);
        assert!(!is_due(&schedule, Some(last), now).unwrap());

        // Fired 10 minutes ago: due.
        let last = now - Duration::minutes(10);
        assert!(is_due(&schedule, Some(last), now).unwrap());
    }
}

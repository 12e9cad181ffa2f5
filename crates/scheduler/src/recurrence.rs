//! Interval and cron recurrences.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use cron::Schedule;

use crate::error::SchedulerError;

/// When a job fires.
#[derive(Debug, Clone)]
pub enum Recurrence {
    /// Every fixed duration, starting one period after the scheduler starts.
    Interval(Duration),
    /// At wall-clock moments matching a cron expression, evaluated at `offset`.
    Cron {
        expression: String,
        schedule: Schedule,
        offset: FixedOffset,
    },
}

/// Normalize a 5-field cron expression to 6-field by prepending "0 " for seconds.
///
/// The `cron` crate requires 6 fields: `sec min hour day-of-month month day-of-week`.
/// Configuration uses standard 5-field cron: `min hour day-of-month month day-of-week`,
/// where weekday numbers run 0-7 with both 0 and 7 meaning Sunday. The `cron`
/// crate numbers weekdays 1-7 from Sunday, so numeric weekdays are rewritten
/// as names before parsing.
pub(crate) fn normalize_cron(expression: &str) -> String {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.as_slice() {
        [minute, hour, day, month, weekday] => {
            format!("0 {minute} {hour} {day} {month} {}", weekday_names(weekday))
        }
        // Already 6-field or non-standard; let the parser judge it.
        _ => expression.trim().to_string(),
    }
}

const WEEKDAYS: [&str; 8] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

fn weekday_name(token: &str) -> Option<&'static str> {
    token.parse::<usize>().ok().and_then(|n| WEEKDAYS.get(n).copied())
}

/// Rewrite each numeric weekday in a list, range or stepped range as a name.
/// Anything not a number in 0-7 is left for the parser to accept or reject.
fn weekday_names(field: &str) -> String {
    field
        .split(',')
        .map(|item| {
            let (base, step) = match item.split_once('/') {
                Some((base, step)) => (base, Some(step)),
                None => (item, None),
            };
            let named = match base.split_once('-') {
                Some((start, end)) => match (weekday_name(start), weekday_name(end)) {
                    // A range ending on Sunday-as-7 wraps past Saturday.
                    (Some(first), Some(_)) if end == "7" && step.is_none() => match start {
                        "0" => "Sun-Sat".to_string(),
                        "7" => "Sun".to_string(),
                        _ => format!("{first}-Sat,Sun"),
                    },
                    (Some(start), Some(end)) => format!("{start}-{end}"),
                    _ => base.to_string(),
                },
                // The parser only steps over ranges, so `n/step` becomes `n-Sat/step`.
                None => match (weekday_name(base), step) {
                    (Some(name), Some(_)) => format!("{name}-Sat"),
                    (Some(name), None) => name.to_string(),
                    (None, _) => base.to_string(),
                },
            };
            match step {
                Some(step) => format!("{named}/{step}"),
                None => named,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

impl Recurrence {
    pub fn interval(period: Duration) -> Result<Self, SchedulerError> {
        if period.is_zero() {
            return Err(SchedulerError::InvalidInterval("interval must be non-zero".into()));
        }
        Ok(Recurrence::Interval(period))
    }

    pub fn cron(expression: &str, offset: FixedOffset) -> Result<Self, SchedulerError> {
        let normalized = normalize_cron(expression);
        let schedule = Schedule::from_str(&normalized).map_err(|e| SchedulerError::InvalidCron {
            expression: expression.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Recurrence::Cron {
            expression: expression.trim().to_string(),
            schedule,
            offset,
        })
    }

    /// Build from a job's `every` / `cron` settings; exactly one must be set.
    pub fn parse(
        job_id: &str,
        every: Option<Duration>,
        cron: Option<&str>,
        offset: FixedOffset,
    ) -> Result<Self, SchedulerError> {
        match (every, cron) {
            (Some(period), None) => Self::interval(period),
            (None, Some(expression)) => Self::cron(expression, offset),
            _ => Err(SchedulerError::AmbiguousRecurrence(job_id.to_string())),
        }
    }

    /// The first firing strictly after `after`.
    ///
    /// Missed occurrences before `after` are never returned, so a process
    /// that was not running simply resumes at the next future occurrence.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Recurrence::Interval(period) => {
                chrono::Duration::from_std(*period).ok().and_then(|d| after.checked_add_signed(d))
            }
            Recurrence::Cron {
                schedule, offset, ..
            } => schedule
                .after(&after.with_timezone(offset))
                .next()
                .map(|t| t.with_timezone(&Utc)),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Recurrence::Interval(period) => format!("every {}s", period.as_secs()),
            Recurrence::Cron {
                expression, offset, ..
            } => format!("cron '{expression}' at UTC{offset}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Weekday};

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn offset(hours: i32) -> FixedOffset {
        FixedOffset::east_opt(hours * 3600).unwrap()
    }

    #[test]
    fn normalize_five_fields() {
        assert_eq!(normalize_cron("0 9 * * *"), "0 0 9 * * *");
        assert_eq!(normalize_cron(" 0 0 9 * * * "), "0 0 9 * * *");
    }

    #[test]
    fn normalize_names_numeric_weekdays() {
        assert_eq!(normalize_cron("0 9 * * 1"), "0 0 9 * * Mon");
        assert_eq!(normalize_cron("0 9 * * 0"), "0 0 9 * * Sun");
        assert_eq!(normalize_cron("0 9 * * 7"), "0 0 9 * * Sun");
        assert_eq!(normalize_cron("0 9 * * 1-5"), "0 0 9 * * Mon-Fri");
        assert_eq!(normalize_cron("0 9 * * 1,3,5"), "0 0 9 * * Mon,Wed,Fri");
        assert_eq!(normalize_cron("0 9 * * 5-7"), "0 0 9 * * Fri-Sat,Sun");
        assert_eq!(normalize_cron("0 9 * * */2"), "0 0 9 * * */2");
        assert_eq!(normalize_cron("0 9 * * 1-5/2"), "0 0 9 * * Mon-Fri/2");
        assert_eq!(normalize_cron("0 9 * * 1/2"), "0 0 9 * * Mon-Sat/2");
        assert_eq!(normalize_cron("0 9 * * Mon"), "0 0 9 * * Mon");
        // Six fields already use the parser's own numbering.
        assert_eq!(normalize_cron("0 0 9 * * 2"), "0 0 9 * * 2");
    }

    #[test]
    fn numeric_monday_fires_on_monday() {
        let r = Recurrence::cron("0 10 * * 1", offset(0)).unwrap();
        // 2024-06-05 is a Wednesday.
        assert_eq!(r.next_after(utc(2024, 6, 5, 12, 0)), Some(utc(2024, 6, 10, 10, 0)));
    }

    #[test]
    fn sunday_as_zero_or_seven() {
        for expression in ["0 9 * * 0", "0 9 * * 7"] {
            let r = Recurrence::cron(expression, offset(0)).unwrap();
            let next = r.next_after(utc(2024, 6, 5, 12, 0)).unwrap();
            assert_eq!(next.weekday(), Weekday::Sun, "{expression}");
            assert_eq!(next, utc(2024, 6, 9, 9, 0));
        }
    }

    #[test]
    fn weekday_range_skips_weekend() {
        let r = Recurrence::cron("0 9 * * 1-5", offset(0)).unwrap();
        // Friday 2024-06-07 after 09:00: next is Monday.
        assert_eq!(r.next_after(utc(2024, 6, 7, 10, 0)), Some(utc(2024, 6, 10, 9, 0)));

        let weekend = Recurrence::cron("0 9 * * 6-7", offset(0)).unwrap();
        assert_eq!(weekend.next_after(utc(2024, 6, 7, 10, 0)), Some(utc(2024, 6, 8, 9, 0)));
        assert_eq!(weekend.next_after(utc(2024, 6, 8, 10, 0)), Some(utc(2024, 6, 9, 9, 0)));
        assert_eq!(weekend.next_after(utc(2024, 6, 9, 10, 0)), Some(utc(2024, 6, 15, 9, 0)));
    }

    #[test]
    fn interval_next_is_one_period_later() {
        let r = Recurrence::interval(Duration::from_secs(3 * 3600)).unwrap();
        assert_eq!(r.next_after(utc(2024, 6, 3, 8, 0)), Some(utc(2024, 6, 3, 11, 0)));
    }

    #[test]
    fn zero_interval_is_rejected() {
        assert!(matches!(
            Recurrence::interval(Duration::ZERO),
            Err(SchedulerError::InvalidInterval(_))
        ));
    }

    #[test]
    fn daily_cron_at_utc() {
        let r = Recurrence::cron("0 9 * * *", offset(0)).unwrap();
        assert_eq!(r.next_after(utc(2024, 6, 3, 8, 59)), Some(utc(2024, 6, 3, 9, 0)));
        // Strictly after: exactly 09:00 moves to the next day.
        assert_eq!(r.next_after(utc(2024, 6, 3, 9, 0)), Some(utc(2024, 6, 4, 9, 0)));
    }

    #[test]
    fn daily_cron_honours_offset() {
        // 09:00 at UTC-05:00 is 14:00 UTC.
        let r = Recurrence::cron("0 9 * * *", offset(-5)).unwrap();
        assert_eq!(r.next_after(utc(2024, 6, 3, 12, 0)), Some(utc(2024, 6, 3, 14, 0)));
    }

    #[test]
    fn weekly_cron_on_monday() {
        let r = Recurrence::cron("0 10 * * Mon", offset(0)).unwrap();
        // 2024-06-05 is a Wednesday.
        let next = r.next_after(utc(2024, 6, 5, 12, 0)).unwrap();
        assert_eq!(next.weekday(), Weekday::Mon);
        assert_eq!((next.hour(), next.minute()), (10, 0));
        assert_eq!(next, utc(2024, 6, 10, 10, 0));
    }

    #[test]
    fn missed_occurrences_are_not_replayed() {
        let r = Recurrence::cron("0 9 * * *", offset(0)).unwrap();
        // Asleep for three days: resume at the next future 09:00 only.
        assert_eq!(r.next_after(utc(2024, 6, 6, 10, 0)), Some(utc(2024, 6, 7, 9, 0)));
    }

    #[test]
    fn invalid_cron_is_rejected() {
        let err = Recurrence::cron("61 25 * * *", offset(0)).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidCron { .. }));
    }

    #[test]
    fn parse_requires_exactly_one() {
        let both = Recurrence::parse("j", Some(Duration::from_secs(60)), Some("0 9 * * *"), offset(0));
        assert!(matches!(both, Err(SchedulerError::AmbiguousRecurrence(_))));
        let none = Recurrence::parse("j", None, None, offset(0));
        assert!(matches!(none, Err(SchedulerError::AmbiguousRecurrence(_))));
        assert!(Recurrence::parse("j", None, Some("0 9 * * *"), offset(0)).is_ok());
    }
}

//! Five-field cron expression parsing (`minute hour day-of-month month
//! day-of-week`) and `next_run` computation, including shortcuts and
//! name tokens for months/weekdays.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CronError {
    #[error("cron expression must have 5 fields, got {0}")]
    WrongFieldCount(usize),
    #[error("invalid cron field '{0}': {1}")]
    InvalidField(String, String),
}

fn shortcut(expr: &str) -> Option<&'static str> {
    match expr.trim() {
        "@yearly" | "@annually" => Some("0 0 1 1 *"),
        "@monthly" => Some("0 0 1 * *"),
        "@weekly" => Some("0 0 * * 0"),
        "@daily" | "@midnight" => Some("0 0 * * *"),
        "@hourly" => Some("0 * * * *"),
        _ => None,
    }
}

fn name_token(field: &str, token: &str) -> Option<u32> {
    let names: &[&str] = match field {
        "month" => &[
            "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
        ],
        "dow" => &["sun", "mon", "tue", "wed", "thu", "fri", "sat"],
        _ => return None,
    };
    let lowered = token.to_ascii_lowercase();
    names.iter().position(|n| *n == lowered).map(|i| i as u32 + if field == "month" { 1 } else { 0 })
}

/// Parse one cron field (e.g. `"*/5"`, `"1-5"`, `"1,3,5"`, `"mon-fri"`)
/// into the set of matching values within `[min, max]`.
fn parse_field(raw: &str, field: &str, min: u32, max: u32) -> Result<Vec<u32>, CronError> {
    let mut values = Vec::new();
    for part in raw.split(',') {
        let (range_part, step) = match part.split_once('/') {
            Some((r, s)) => (
                r,
                s.parse::<u32>()
                    .map_err(|_| CronError::InvalidField(field.to_string(), part.to_string()))?,
            ),
            None => (part, 1),
        };

        let (lo, hi) = if range_part == "*" {
            (min, max)
        } else if let Some((a, b)) = range_part.split_once('-') {
            let lo = resolve_token(a, field)?;
            let hi = resolve_token(b, field)?;
            (lo, hi)
        } else {
            let v = resolve_token(range_part, field)?;
            (v, v)
        };

        if lo > hi || hi > max || lo < min {
            return Err(CronError::InvalidField(field.to_string(), part.to_string()));
        }

        let mut v = lo;
        while v <= hi {
            values.push(v);
            v += step.max(1);
        }
    }
    values.sort_unstable();
    values.dedup();
    Ok(values)
}

fn resolve_token(token: &str, field: &str) -> Result<u32, CronError> {
    if let Ok(n) = token.parse::<u32>() {
        return Ok(n);
    }
    name_token(field, token).ok_or_else(|| CronError::InvalidField(field.to_string(), token.to_string()))
}

/// A parsed five-field cron expression, ready for repeated `matches`
/// checks.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    minutes: Vec<u32>,
    hours: Vec<u32>,
    days_of_month: Vec<u32>,
    months: Vec<u32>,
    days_of_week: Vec<u32>,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self, CronError> {
        let expanded = shortcut(expr).map(|s| s.to_string()).unwrap_or_else(|| expr.trim().to_string());
        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::WrongFieldCount(fields.len()));
        }
        Ok(Self {
            minutes: parse_field(fields[0], "minute", 0, 59)?,
            hours: parse_field(fields[1], "hour", 0, 23)?,
            days_of_month: parse_field(fields[2], "dom", 1, 31)?,
            months: parse_field(fields[3], "month", 1, 12)?,
            days_of_week: parse_field(fields[4], "dow", 0, 6)?,
        })
    }

    fn matches(&self, dt: &DateTime<Utc>) -> bool {
        self.minutes.contains(&dt.minute())
            && self.hours.contains(&dt.hour())
            && self.days_of_month.contains(&dt.day())
            && self.months.contains(&dt.month())
            && self.days_of_week.contains(&(dt.weekday().num_days_from_sunday()))
    }

    /// Advance minute-by-minute from `after` (exclusive) until a match,
    /// bounded at ~4 years to guarantee termination across leap years.
    pub fn next_run(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after
            .with_second(0)
            .unwrap()
            .with_nanosecond(0)
            .unwrap()
            + Duration::minutes(1);

        let bound = 60 * 24 * 366 * 4;
        let mut candidate = start;
        for _ in 0..bound {
            if self.matches(&candidate) {
                return Some(candidate);
            }
            candidate += Duration::minutes(1);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn daily_shortcut_fires_at_midnight() {
        let sched = CronSchedule::parse("@daily").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 1, 1, 13, 0, 0).unwrap();
        let next = sched.next_run(after).unwrap();
        assert_eq!((next.hour(), next.minute()), (0, 0));
        assert_eq!(next.day(), 2);
    }

    #[test]
    fn every_five_minutes_step_syntax() {
        let sched = CronSchedule::parse("*/5 * * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 1, 1, 0, 1, 0).unwrap();
        let next = sched.next_run(after).unwrap();
        assert_eq!(next.minute(), 5);
    }

    #[test]
    fn weekday_name_range_resolves() {
        let sched = CronSchedule::parse("0 9 * * mon-fri").unwrap();
        // 2026-01-03 is a Saturday.
        let after = Utc.with_ymd_and_hms(2026, 1, 3, 0, 0, 0).unwrap();
        let next = sched.next_run(after).unwrap();
        assert_eq!(next.weekday().num_days_from_sunday(), 1); // Monday
    }

    #[test]
    fn month_name_token_resolves() {
        let sched = CronSchedule::parse("0 0 1 dec *").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let next = sched.next_run(after).unwrap();
        assert_eq!(next.month(), 12);
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(matches!(CronSchedule::parse("* * *"), Err(CronError::WrongFieldCount(3))));
    }
}

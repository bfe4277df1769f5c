//! Cron expression handling.
//! Accepts classic 5-field expressions ("MIN HOUR DOM MON DOW"), which are
//! run at second 0, as well as the 6/7-field and `@daily`-style forms the
//! `cron` crate understands.
//! Example: "0 8 * * *" = every day at 8:00 UTC
//!
//! Note: day-of-week numbers follow the `cron` crate (1 = Sunday .. 7 = Saturday);
//! prefer names ("MON-FRI") in recipes.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use taskvault_core::{Result, VaultError};

/// A parsed cron schedule that remembers the expression it came from.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: Schedule,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let normalized = normalize(expression);
        let schedule = Schedule::from_str(&normalized).map_err(|e| {
            VaultError::InvalidPayload(format!("invalid cron expression '{expression}': {e}"))
        })?;
        Ok(Self {
            expression: expression.trim().to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    pub fn is_valid(expression: &str) -> bool {
        Self::parse(expression).is_ok()
    }
}

impl PartialEq for CronSchedule {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression
    }
}

/// Parse a cron expression and compute the next run time.
pub fn next_run_from_cron(expression: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match CronSchedule::parse(expression) {
        Ok(schedule) => schedule.next_after(after),
        Err(e) => {
            tracing::warn!("{e}");
            None
        }
    }
}

/// Prepend a seconds field to classic 5-field expressions.
fn normalize(expression: &str) -> String {
    let trimmed = expression.trim();
    if trimmed.starts_with('@') {
        return trimmed.to_string();
    }
    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    if fields.len() == 5 {
        format!("0 {}", fields.join(" "))
    } else {
        fields.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn test_every_hour() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 30, 0).unwrap();
        let next = next_run_from_cron("0 * * * *", after).unwrap();
        assert_eq!(next.hour(), 11);
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn test_specific_time() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 7, 0, 0).unwrap();
        let next = next_run_from_cron("0 8 * * *", after).unwrap();
        assert_eq!(next.hour(), 8);
        assert_eq!(next.minute(), 0);
        assert_eq!(next.second(), 0);
    }

    #[test]
    fn test_every_15_minutes() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 2, 0).unwrap();
        let next = next_run_from_cron("*/15 * * * *", after).unwrap();
        assert_eq!(next.minute(), 15);
    }

    #[test]
    fn test_six_field_expression() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 0, 0).unwrap();
        let next = next_run_from_cron("30 * * * * *", after).unwrap();
        assert_eq!(next.second(), 30);
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn test_next_is_strictly_after() {
        let at = Utc.with_ymd_and_hms(2026, 2, 22, 8, 0, 0).unwrap();
        let next = next_run_from_cron("0 8 * * *", at).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 23, 8, 0, 0).unwrap());
    }

    #[test]
    fn test_invalid_expression() {
        let after = Utc::now();
        assert!(next_run_from_cron("bad", after).is_none());
        assert!(!CronSchedule::is_valid("every 5m"));
        assert!(CronSchedule::is_valid("0 8 * * *"));
    }
}

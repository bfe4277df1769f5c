//! Repeat expressions: decide whether and when a finished task runs again.
//!
//! Accepted forms (as JSON/TOML values):
//! - `false` / `null` / `0` → never repeat
//! - `true` → repeat immediately, forever
//! - `N` (integer) → repeat while `run_count < N`
//! - `"every 5m"` → next start = last start + 5m (fixed cadence)
//! - `"after 5m"` → next start = completion + 5m
//! - a cron expression, e.g. `"*/10 * * * *"`
//!
//! Anything else is logged and treated as "never".

use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::cron::CronSchedule;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Repeat {
    #[default]
    Never,
    Always,
    Times(u32),
    Every(Duration),
    After(Duration),
    Cron(CronSchedule),
}

impl Repeat {
    /// Interpret a loosely typed repeat value.
    pub fn from_value(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Never,
            serde_json::Value::Bool(true) => Self::Always,
            serde_json::Value::Bool(false) => Self::Never,
            serde_json::Value::Number(n) => match n.as_u64() {
                Some(times) => Self::times(times),
                // whole floats like 2.0 count; fractions and negatives do not
                None => match n.as_f64() {
                    Some(f) if f >= 0.0 && f.fract() == 0.0 => Self::times(f as u64),
                    _ => invalid(&n.to_string()),
                },
            },
            serde_json::Value::String(s) => Self::parse(s),
            other => {
                tracing::warn!("⚠️ Unsupported repeat value {other}, task will not repeat");
                Self::Never
            }
        }
    }

    fn times(times: u64) -> Self {
        match times {
            0 => Self::Never,
            n => Self::Times(u32::try_from(n).unwrap_or(u32::MAX)),
        }
    }

    /// Interpret a repeat string ("every 5m", "after 1h", cron, "true", "3", ...).
    pub fn parse(input: &str) -> Self {
        let s = input.trim();
        let lower = s.to_lowercase();
        match lower.as_str() {
            "" | "false" | "no" | "never" => return Self::Never,
            "true" | "yes" | "always" => return Self::Always,
            _ => {}
        }
        if let Ok(times) = lower.parse::<u32>() {
            return if times == 0 { Self::Never } else { Self::Times(times) };
        }
        if let Some(rest) = lower.strip_prefix("every ") {
            return match parse_duration(rest) {
                Some(d) => Self::Every(d),
                None => invalid(s),
            };
        }
        if let Some(rest) = lower.strip_prefix("after ") {
            return match parse_duration(rest) {
                Some(d) => Self::After(d),
                None => invalid(s),
            };
        }
        match CronSchedule::parse(s) {
            Ok(schedule) => Self::Cron(schedule),
            Err(_) => invalid(s),
        }
    }

    /// Falsy repeat values never produce a second run.
    pub fn is_falsy(&self) -> bool {
        matches!(self, Self::Never | Self::Times(0))
    }
}

fn invalid(s: &str) -> Repeat {
    tracing::warn!("⚠️ Unrecognized repeat expression '{s}', task will not repeat");
    Repeat::Never
}

/// Parse a human duration like "5m", "1h", "90s", "1h 30m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let d = humantime::parse_duration(s.trim()).ok()?;
    (!d.is_zero()).then_some(d)
}

impl std::fmt::Display for Repeat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Never => write!(f, "false"),
            Self::Always => write!(f, "true"),
            Self::Times(n) => write!(f, "{n}"),
            Self::Every(d) => write!(f, "every {}", humantime::format_duration(*d)),
            Self::After(d) => write!(f, "after {}", humantime::format_duration(*d)),
            Self::Cron(c) => write!(f, "{}", c.expression()),
        }
    }
}

impl Serialize for Repeat {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Never => serializer.serialize_bool(false),
            Self::Always => serializer.serialize_bool(true),
            Self::Times(n) => serializer.serialize_u32(*n),
            other => serializer.serialize_str(&other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value() {
        assert_eq!(Repeat::from_value(&json!(null)), Repeat::Never);
        assert_eq!(Repeat::from_value(&json!(false)), Repeat::Never);
        assert_eq!(Repeat::from_value(&json!(true)), Repeat::Always);
        assert_eq!(Repeat::from_value(&json!(3)), Repeat::Times(3));
        assert_eq!(Repeat::from_value(&json!(0)), Repeat::Never);
        assert_eq!(Repeat::from_value(&json!(-2)), Repeat::Never);
        assert_eq!(Repeat::from_value(&json!([1, 2])), Repeat::Never);
    }

    #[test]
    fn test_from_value_whole_floats() {
        assert_eq!(Repeat::from_value(&json!(2.0)), Repeat::Times(2));
        assert_eq!(Repeat::from_value(&json!(0.0)), Repeat::Never);
        assert_eq!(Repeat::from_value(&json!(1e12)), Repeat::Times(u32::MAX));
        assert_eq!(Repeat::from_value(&json!(2.5)), Repeat::Never);
        assert_eq!(Repeat::from_value(&json!(-3.0)), Repeat::Never);
    }

    #[test]
    fn test_parse_durations() {
        assert_eq!(Repeat::parse("every 5m"), Repeat::Every(Duration::from_secs(300)));
        assert_eq!(Repeat::parse("after 1h"), Repeat::After(Duration::from_secs(3600)));
        assert_eq!(
            Repeat::parse("Every 1h 30m"),
            Repeat::Every(Duration::from_secs(5400))
        );
        assert_eq!(Repeat::parse("every banana"), Repeat::Never);
        assert_eq!(Repeat::parse("every 0s"), Repeat::Never);
    }

    #[test]
    fn test_parse_cron_and_literals() {
        assert!(matches!(Repeat::parse("*/10 * * * *"), Repeat::Cron(_)));
        assert_eq!(Repeat::parse("true"), Repeat::Always);
        assert_eq!(Repeat::parse("4"), Repeat::Times(4));
        assert_eq!(Repeat::parse("whenever"), Repeat::Never);
    }

    #[test]
    fn test_display_and_serialize() {
        let every = Repeat::parse("every 5m");
        assert_eq!(every.to_string(), "every 5m");
        assert_eq!(serde_json::to_value(&every).unwrap(), json!("every 5m"));
        assert_eq!(serde_json::to_value(Repeat::Times(2)).unwrap(), json!(2));
        assert_eq!(serde_json::to_value(Repeat::Never).unwrap(), json!(false));
    }

    #[test]
    fn test_falsy() {
        assert!(Repeat::Never.is_falsy());
        assert!(!Repeat::Always.is_falsy());
        assert!(!Repeat::Times(1).is_falsy());
    }
}

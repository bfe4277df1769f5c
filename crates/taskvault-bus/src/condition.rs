//! Alert conditions: `field <op> value` filters a handler applies to events.
//!
//! Fields: `message`, `severity`, `source`, `timestamp`, `tags`, or any key
//! of the event's `data`. `exists` is true when the field is present and
//! not null; `missing` is its negation.

use regex::Regex;
use serde_json::Value;

use taskvault_core::config::{ConditionConfig, ConditionOp};
use taskvault_core::{Event, Result, Severity, VaultError};

/// A compiled condition.
#[derive(Debug, Clone)]
pub struct Condition {
    field: String,
    op: ConditionOp,
    value: Option<Value>,
    regex: Option<Regex>,
}

impl Condition {
    pub fn compile(config: &ConditionConfig) -> Result<Self> {
        let needs_value = !matches!(config.op, ConditionOp::Exists | ConditionOp::Missing);
        if needs_value && config.value.is_none() {
            return Err(VaultError::Config(format!(
                "condition on '{}' ({:?}) needs a value",
                config.field, config.op
            )));
        }
        let regex = match (config.op, &config.value) {
            (ConditionOp::Matches, Some(v)) => {
                let pattern = as_text(v);
                Some(Regex::new(&pattern).map_err(|e| {
                    VaultError::Config(format!("bad pattern '{pattern}' on '{}': {e}", config.field))
                })?)
            }
            _ => None,
        };
        Ok(Self {
            field: config.field.clone(),
            op: config.op,
            value: config.value.clone(),
            regex,
        })
    }

    pub fn evaluate(&self, event: &Event) -> bool {
        let actual = event.field(&self.field);
        match self.op {
            ConditionOp::Exists => actual.is_some(),
            ConditionOp::Missing => actual.is_none(),
            ConditionOp::Eq => self.equals(actual.as_ref()),
            ConditionOp::Ne => !self.equals(actual.as_ref()),
            ConditionOp::Gt => self.compare(actual.as_ref()).is_some_and(|o| o.is_gt()),
            ConditionOp::Lt => self.compare(actual.as_ref()).is_some_and(|o| o.is_lt()),
            ConditionOp::Contains => match (actual, &self.value) {
                (Some(Value::Array(items)), Some(want)) => {
                    items.iter().any(|item| loose_eq(item, want))
                }
                (Some(v), Some(want)) => as_text(&v).contains(as_text(want).as_str()),
                _ => false,
            },
            ConditionOp::Matches => match (actual, &self.regex) {
                (Some(v), Some(re)) => re.is_match(&as_text(&v)),
                _ => false,
            },
        }
    }

    fn equals(&self, actual: Option<&Value>) -> bool {
        match (actual, &self.value) {
            (Some(a), Some(want)) => loose_eq(a, want),
            (None, Some(Value::Null)) => true,
            _ => false,
        }
    }

    fn compare(&self, actual: Option<&Value>) -> Option<std::cmp::Ordering> {
        let actual = actual?;
        let want = self.value.as_ref()?;
        if self.field == "severity" {
            let a = Severity::parse(&as_text(actual))?;
            let b = Severity::parse(&as_text(want))?;
            return Some(a.cmp(&b));
        }
        match (as_number(actual), as_number(want)) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => Some(as_text(actual).cmp(&as_text(want))),
        }
    }
}

/// Strings compare as written, everything else by value; `"3"` equals `3`.
fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => as_text(a) == as_text(b),
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cond(field: &str, op: ConditionOp, value: Option<Value>) -> Condition {
        Condition::compile(&ConditionConfig {
            field: field.into(),
            op,
            value,
        })
        .unwrap()
    }

    fn event() -> Event {
        Event::new("backup", Severity::Warn, "disk usage at 91%")
            .with_tags(["ops", "disk"])
            .with_data(json!({"usage": 91, "host": "db-1", "note": null}))
    }

    #[test]
    fn test_exists_means_present() {
        let e = event();
        assert!(cond("host", ConditionOp::Exists, None).evaluate(&e));
        assert!(!cond("nope", ConditionOp::Exists, None).evaluate(&e));
        // null counts as absent
        assert!(!cond("note", ConditionOp::Exists, None).evaluate(&e));
        assert!(cond("note", ConditionOp::Missing, None).evaluate(&e));
        assert!(!cond("message", ConditionOp::Missing, None).evaluate(&e));
    }

    #[test]
    fn test_equality() {
        let e = event();
        assert!(cond("source", ConditionOp::Eq, Some(json!("backup"))).evaluate(&e));
        assert!(cond("usage", ConditionOp::Eq, Some(json!("91"))).evaluate(&e));
        assert!(cond("host", ConditionOp::Ne, Some(json!("db-2"))).evaluate(&e));
        assert!(cond("nope", ConditionOp::Ne, Some(json!("x"))).evaluate(&e));
    }

    #[test]
    fn test_ordering() {
        let e = event();
        assert!(cond("usage", ConditionOp::Gt, Some(json!(90))).evaluate(&e));
        assert!(!cond("usage", ConditionOp::Lt, Some(json!(90))).evaluate(&e));
        assert!(cond("severity", ConditionOp::Gt, Some(json!("info"))).evaluate(&e));
        assert!(cond("severity", ConditionOp::Lt, Some(json!("error"))).evaluate(&e));
        assert!(!cond("nope", ConditionOp::Gt, Some(json!(1))).evaluate(&e));
    }

    #[test]
    fn test_contains_and_matches() {
        let e = event();
        assert!(cond("tags", ConditionOp::Contains, Some(json!("disk"))).evaluate(&e));
        assert!(!cond("tags", ConditionOp::Contains, Some(json!("net"))).evaluate(&e));
        assert!(cond("message", ConditionOp::Contains, Some(json!("usage"))).evaluate(&e));
        assert!(cond("message", ConditionOp::Matches, Some(json!(r"\d+%$"))).evaluate(&e));
        assert!(!cond("host", ConditionOp::Matches, Some(json!("^web-"))).evaluate(&e));
    }

    #[test]
    fn test_compile_errors() {
        let missing_value = ConditionConfig {
            field: "usage".into(),
            op: ConditionOp::Gt,
            value: None,
        };
        assert!(Condition::compile(&missing_value).is_err());
        let bad_regex = ConditionConfig {
            field: "message".into(),
            op: ConditionOp::Matches,
            value: Some(json!("(unclosed")),
        };
        assert!(Condition::compile(&bad_regex).is_err());
    }
}

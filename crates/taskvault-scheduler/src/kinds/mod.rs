//! Built-in task kinds. Each kind owns a typed parameter struct parsed
//! from the submission payload and implements [`Runnable`](crate::Runnable).

pub mod command;
pub mod message;
pub mod poll;
pub mod script;
pub mod sleep;
pub mod watch_folder;

use std::time::Duration;

use serde::de::DeserializeOwned;

use taskvault_core::{Result, VaultError};

/// Longest output (in bytes) kept in a history record.
pub const MAX_OUTPUT: usize = 5000;

/// Deserialize a kind's parameters out of the raw payload.
pub(crate) fn params<T: DeserializeOwned>(kind: &str, payload: &serde_json::Value) -> Result<T> {
    serde_json::from_value(payload.clone())
        .map_err(|e| VaultError::InvalidPayload(format!("{kind}: {e}")))
}

/// A seconds field as a `Duration`. Negatives clamp to `floor`; values too
/// large for a `Duration` (or not numbers) are rejected.
pub(crate) fn seconds_param(kind: &str, field: &str, value: f64, floor: f64) -> Result<Duration> {
    let clamped = if value.is_nan() { value } else { value.max(floor) };
    Duration::try_from_secs_f64(clamped).map_err(|_| {
        VaultError::InvalidPayload(format!("{kind}: {field} out of range ({value})"))
    })
}

/// Cut `s` to at most `max` bytes on a char boundary, noting the original size.
pub fn truncate_output(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...\n[truncated, {} bytes total]", &s[..end], s.len())
}

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use taskvault_core::Result;

use crate::runnable::{Runnable, TaskContext};

/// Waits a fixed number of seconds. Useful as a timer or placeholder.
#[derive(Debug, Clone)]
pub struct SleepTask {
    seconds: f64,
    duration: Duration,
}

#[derive(Deserialize)]
struct SleepParams {
    #[serde(default)]
    seconds: f64,
}

impl SleepTask {
    pub const KIND: &'static str = "sleep";

    /// Non-finite values become zero; anything past `Duration::MAX` saturates.
    pub fn new(seconds: f64) -> Self {
        let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        Self {
            seconds,
            duration: Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX),
        }
    }

    pub fn from_payload(payload: &serde_json::Value) -> Result<Self> {
        let p: SleepParams = super::params(Self::KIND, payload)?;
        let duration = super::seconds_param(Self::KIND, "seconds", p.seconds, 0.0)?;
        Ok(Self {
            seconds: p.seconds.max(0.0),
            duration,
        })
    }
}

#[async_trait]
impl Runnable for SleepTask {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<Option<String>> {
        ctx.sleep(self.duration).await?;
        Ok(Some(format!("slept {}s", self.seconds)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskvault_core::EventQueue;

    #[tokio::test]
    async fn test_sleep_completes() {
        let task = SleepTask::from_payload(&serde_json::json!({"seconds": 0.01})).unwrap();
        let ctx = TaskContext::new(1, "nap", 1, EventQueue::new("nap", 4));
        assert_eq!(task.execute(&ctx).await.unwrap().as_deref(), Some("slept 0.01s"));
    }

    #[test]
    fn test_negative_is_clamped() {
        assert_eq!(SleepTask::new(-3.0).seconds, 0.0);
        assert_eq!(SleepTask::new(1e300).duration, Duration::MAX);
    }

    #[test]
    fn test_out_of_range_payload_is_rejected() {
        let err = SleepTask::from_payload(&serde_json::json!({"seconds": 1e300})).unwrap_err();
        assert!(matches!(err, taskvault_core::VaultError::InvalidPayload(_)));
        assert_eq!(
            SleepTask::from_payload(&serde_json::json!({"seconds": -1})).unwrap().duration,
            Duration::ZERO
        );
    }
}

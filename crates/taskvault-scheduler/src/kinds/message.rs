use async_trait::async_trait;
use serde::Deserialize;

use taskvault_core::{Event, Result, Severity};

use crate::runnable::{Runnable, TaskContext};

/// Emits one configured event per run. Handy for heartbeats and reminders.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageTask {
    pub message: String,
    #[serde(default = "default_severity")]
    pub severity: Severity,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

fn default_severity() -> Severity {
    Severity::Info
}

impl MessageTask {
    pub const KIND: &'static str = "message";

    pub fn from_payload(payload: &serde_json::Value) -> Result<Self> {
        super::params(Self::KIND, payload)
    }
}

#[async_trait]
impl Runnable for MessageTask {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<Option<String>> {
        let event = Event::new(&ctx.name, self.severity, self.message.clone())
            .with_tags(self.tags.iter().cloned())
            .with_data(self.data.clone());
        ctx.push(event);
        Ok(Some(self.message.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskvault_core::EventQueue;

    #[tokio::test]
    async fn test_emits_configured_event() {
        let task = MessageTask::from_payload(&serde_json::json!({
            "message": "disk almost full",
            "severity": "warn",
            "tags": ["ops"]
        }))
        .unwrap();
        let ctx = TaskContext::new(7, "disk-alert", 1, EventQueue::new("disk-alert", 4));
        task.execute(&ctx).await.unwrap();
        let events = ctx.events.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Warn);
        assert_eq!(events[0].tags, vec!["ops".to_string()]);
        assert_eq!(events[0].data["task_id"], 7);
    }

    #[test]
    fn test_message_is_required() {
        assert!(MessageTask::from_payload(&serde_json::json!({"severity": "info"})).is_err());
    }
}

//! The polymorphic unit of work every task kind implements.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use taskvault_core::{Event, EventQueue, Result, Severity, VaultError};

use crate::task::TaskId;

/// What a task actually does when the vault admits it.
///
/// Implementations must check `ctx.cancel` at safe points; a run that
/// ignores cancellation is hard-aborted after the vault's grace period.
/// `Ok(output)` marks the run `finished`, `Err` marks it `error`.
#[async_trait]
pub trait Runnable: Send + Sync + Debug {
    /// Registry tag ("command", "sleep", ...).
    fn kind(&self) -> &'static str;

    async fn execute(&self, ctx: &TaskContext) -> Result<Option<String>>;
}

/// Per-run handle passed to a [`Runnable`].
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub id: TaskId,
    pub name: String,
    /// 1-based run number.
    pub run: u32,
    pub cancel: CancellationToken,
    pub events: EventQueue,
}

impl TaskContext {
    pub fn new(id: TaskId, name: &str, run: u32, events: EventQueue) -> Self {
        Self {
            id,
            name: name.to_string(),
            run,
            cancel: CancellationToken::new(),
            events,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Emit an event tagged with this task's id.
    pub fn emit(&self, severity: Severity, message: impl Into<String>) {
        self.push(Event::new(&self.name, severity, message));
    }

    pub fn push(&self, event: Event) {
        let mut event = event;
        event.data = match event.data {
            serde_json::Value::Object(mut map) => {
                map.entry("task_id").or_insert(self.id.into());
                serde_json::Value::Object(map)
            }
            serde_json::Value::Null => serde_json::json!({ "task_id": self.id }),
            other => serde_json::json!({ "task_id": self.id, "value": other }),
        };
        self.events.push(event);
    }

    /// Cancellation-aware sleep. Errors if the run is canceled first.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(self.canceled()),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// The error a kind returns when it notices cancellation.
    pub fn canceled(&self) -> VaultError {
        VaultError::Execution(format!("task '{}' canceled", self.name))
    }
}

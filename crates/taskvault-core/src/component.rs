//! The contract between long-lived components and the Sentry supervisor.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::event::Event;

/// A long-lived, restartable part of the runtime (vault, bus, recipe loader, ...).
#[async_trait]
pub trait Component: Send + Sync {
    /// Stable component name used in logs and health reports.
    fn name(&self) -> &str;

    /// Whether the component's loop is alive right now.
    fn is_running(&self) -> bool;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Stop (best effort) then start again. Returns whether it is running afterwards.
    async fn restart(&self) -> Result<bool> {
        if let Err(e) = self.stop().await {
            tracing::debug!("Stop before restart of '{}' failed: {e}", self.name());
        }
        self.start().await?;
        Ok(self.is_running())
    }

    fn status(&self) -> ComponentStatus {
        ComponentStatus {
            name: self.name().to_string(),
            running: self.is_running(),
        }
    }
}

/// Anything the message bus can drain events from.
pub trait EventSource: Send + Sync {
    fn source_name(&self) -> &str;

    /// Take all pending events, oldest first.
    fn drain_events(&self) -> Vec<Event>;
}

/// Point-in-time liveness of one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentStatus {
    pub name: String,
    pub running: bool,
}

//! Sentry: the supervisor loop that restarts components found not running.
//!
//! Every tick it checks each managed component; a dead one gets a warning,
//! a restart, a short grace period and a second look. A component that
//! stays down is logged and left alone until the next tick. No backoff, no
//! escalation.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use taskvault_core::config::{SentryConfig, secs};
use taskvault_core::{
    Component, Event, EventQueue, EventSource, Result, ServiceLoop, Severity,
};

const SENTRY_NAME: &str = "sentry";

/// Counts from one supervision pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SentryReport {
    /// Components looked at.
    pub checked: usize,
    /// Components found not running.
    pub errored: usize,
    /// Restarted and running again.
    pub succeeded: usize,
    /// Still down after the restart attempt.
    pub failed: usize,
}

struct SentryShared {
    config: SentryConfig,
    components: Mutex<Vec<Arc<dyn Component>>>,
    events: EventQueue,
    last_report: Mutex<Option<SentryReport>>,
}

pub struct Sentry {
    shared: Arc<SentryShared>,
    service: ServiceLoop,
}

impl Sentry {
    pub fn new(config: SentryConfig) -> Self {
        Self {
            shared: Arc::new(SentryShared {
                config,
                components: Mutex::new(Vec::new()),
                events: EventQueue::new(SENTRY_NAME, 200),
                last_report: Mutex::new(None),
            }),
            service: ServiceLoop::new(SENTRY_NAME),
        }
    }

    /// Put a component under supervision.
    pub fn manage(&self, component: Arc<dyn Component>) {
        tracing::debug!("🛡️ Sentry now watching '{}'", component.name());
        self.shared
            .components
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(component);
    }

    pub fn managed(&self) -> Vec<Arc<dyn Component>> {
        self.shared.components()
    }

    /// Run one supervision pass now.
    pub async fn check(&self) -> SentryReport {
        self.shared.check().await
    }

    pub fn last_report(&self) -> Option<SentryReport> {
        *self
            .shared
            .last_report
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

impl SentryShared {
    fn components(&self) -> Vec<Arc<dyn Component>> {
        self.components
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn restart_grace(&self) -> Duration {
        secs(self.config.restart_grace_secs, Duration::from_secs(1))
    }

    async fn check(&self) -> SentryReport {
        let mut report = SentryReport::default();
        for component in self.components() {
            report.checked += 1;
            if component.is_running() {
                continue;
            }
            report.errored += 1;
            let name = component.name().to_string();
            tracing::warn!("⚠️ Component '{name}' is not running, restarting");
            self.events.push(
                Event::new(SENTRY_NAME, Severity::Warn, format!("component '{name}' is down"))
                    .with_tags(["sentry", "restart"])
                    .with_data(serde_json::json!({ "component": name })),
            );

            match AssertUnwindSafe(component.restart()).catch_unwind().await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::error!("❌ Restart of '{name}' failed: {e}"),
                Err(_) => tracing::error!("💥 Restart of '{name}' panicked"),
            }
            tokio::time::sleep(self.restart_grace()).await;

            if component.is_running() {
                report.succeeded += 1;
                tracing::info!("✅ Component '{name}' restarted");
                self.events
                    .emit(Severity::Info, format!("component '{name}' restarted"));
            } else {
                report.failed += 1;
                tracing::error!("❌ Component '{name}' is still down");
                self.events.push(
                    Event::new(SENTRY_NAME, Severity::Error, format!("component '{name}' failed to restart"))
                        .with_tags(["sentry", "restart"])
                        .with_data(serde_json::json!({ "component": name })),
                );
            }
        }
        if report.errored > 0 {
            tracing::info!(
                "🛡️ Sentry pass: {} checked, {} down, {} restarted, {} failed",
                report.checked,
                report.errored,
                report.succeeded,
                report.failed
            );
        }
        *self.last_report.lock().unwrap_or_else(|e| e.into_inner()) = Some(report);
        report
    }
}

async fn run_loop(shared: Arc<SentryShared>, token: CancellationToken) {
    let interval = secs(shared.config.interval_secs, Duration::from_secs(60));
    let initial = secs(shared.config.initial_delay_secs, Duration::ZERO);
    tracing::info!("🛡️ Sentry started (every {interval:?}, first check in {initial:?})");

    tokio::select! {
        _ = token.cancelled() => return,
        _ = tokio::time::sleep(initial) => {}
    }
    loop {
        shared.check().await;
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    tracing::info!("🛑 Sentry stopped");
}

#[async_trait]
impl Component for Sentry {
    fn name(&self) -> &str {
        SENTRY_NAME
    }

    fn is_running(&self) -> bool {
        self.service.is_running()
    }

    async fn start(&self) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        self.service.spawn(move |token| run_loop(shared, token));
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        // a pass may be mid-restart; give it the restart grace plus a margin
        let grace = self.shared.restart_grace() + Duration::from_secs(1);
        self.service.shutdown(grace).await;
        Ok(())
    }
}

impl EventSource for Sentry {
    fn source_name(&self) -> &str {
        SENTRY_NAME
    }

    fn drain_events(&self) -> Vec<Event> {
        self.shared.events.drain()
    }
}

impl Drop for Sentry {
    fn drop(&mut self) {
        self.service.abort();
    }
}

//! The message bus component.
//!
//! Sources (the vault, the supervisor, the recipe loader, ...) keep their
//! own bounded queues. The bus drains every registered source plus its own
//! inbox on a fixed interval and fans the events out to each handler that
//! accepts them. A failing handler is logged and skipped; it never blocks
//! the others.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use taskvault_core::config::BusConfig;
use taskvault_core::{Component, Event, EventQueue, EventSource, Result, ServiceLoop};

use crate::handlers::Handler;

const BUS_NAME: &str = "bus";

/// Delivery counters since the bus was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    pub flushed: u64,
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
}

struct BusShared {
    config: BusConfig,
    handlers: Vec<Handler>,
    sources: Mutex<Vec<Arc<dyn EventSource>>>,
    inbox: EventQueue,
    client: reqwest::Client,
    flushed: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Fan-out of events to log/file/webhook handlers.
pub struct MessageBus {
    shared: Arc<BusShared>,
    service: ServiceLoop,
}

impl MessageBus {
    /// Build the bus and compile every configured handler.
    pub fn new(config: BusConfig) -> Result<Self> {
        let handlers = config
            .handlers
            .iter()
            .map(Handler::from_config)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::with_handlers(config, handlers))
    }

    pub fn with_handlers(config: BusConfig, handlers: Vec<Handler>) -> Self {
        let inbox = EventQueue::new(BUS_NAME, config.queue_size);
        Self {
            shared: Arc::new(BusShared {
                config,
                handlers,
                sources: Mutex::new(Vec::new()),
                inbox,
                client: reqwest::Client::new(),
                flushed: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
            service: ServiceLoop::new(BUS_NAME),
        }
    }

    /// Queue an event for the next flush. Never blocks; the oldest event is
    /// dropped when the inbox is full.
    pub fn push(&self, event: Event) {
        self.shared.inbox.push(event);
    }

    /// Register a source to drain on every flush.
    pub fn register(&self, source: Arc<dyn EventSource>) {
        tracing::debug!("📬 Bus source registered: {}", source.source_name());
        self.shared
            .sources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(source);
    }

    pub fn source_names(&self) -> Vec<String> {
        self.shared
            .sources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|s| s.source_name().to_string())
            .collect()
    }

    pub fn handler_names(&self) -> Vec<&str> {
        self.shared.handlers.iter().map(|h| h.name.as_str()).collect()
    }

    /// Drain everything now and deliver it. Returns the number of events drained.
    pub async fn flush(&self) -> usize {
        self.shared.flush().await
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            flushed: self.shared.flushed.load(Ordering::Relaxed),
            delivered: self.shared.delivered.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            dropped: self.shared.inbox.dropped(),
        }
    }
}

impl BusShared {
    fn collect(&self) -> Vec<Event> {
        let sources: Vec<Arc<dyn EventSource>> = self
            .sources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let mut events = self.inbox.drain();
        for source in sources {
            events.extend(source.drain_events());
        }
        events.sort_by_key(|e| e.timestamp);
        events
    }

    async fn flush(&self) -> usize {
        let events = self.collect();
        if events.is_empty() {
            return 0;
        }
        for handler in &self.handlers {
            let accepted: Vec<&Event> = events.iter().filter(|e| handler.accepts(e)).collect();
            if accepted.is_empty() {
                continue;
            }
            match handler.dispatch(&accepted, &self.client).await {
                Ok(()) => {
                    self.delivered
                        .fetch_add(accepted.len() as u64, Ordering::Relaxed);
                }
                Err(e) => {
                    self.failed.fetch_add(accepted.len() as u64, Ordering::Relaxed);
                    tracing::warn!("⚠️ Handler '{}' failed: {e}", handler.name);
                }
            }
        }
        self.flushed.fetch_add(events.len() as u64, Ordering::Relaxed);
        events.len()
    }
}

async fn run_loop(shared: Arc<BusShared>, token: CancellationToken) {
    let interval = taskvault_core::config::secs(
        shared.config.interval_secs,
        std::time::Duration::from_millis(500),
    );
    tracing::info!(
        "📡 Message bus started ({} handler(s), flush every {:?})",
        shared.handlers.len(),
        interval
    );
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        shared.flush().await;
    }
    // deliver whatever is left before going down
    shared.flush().await;
    tracing::info!("🛑 Message bus stopped");
}

#[async_trait]
impl Component for MessageBus {
    fn name(&self) -> &str {
        BUS_NAME
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
        self.service
            .shutdown(std::time::Duration::from_secs(5))
            .await;
        Ok(())
    }
}

impl Drop for MessageBus {
    fn drop(&mut self) {
        self.service.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use taskvault_core::Severity;
    use taskvault_core::config::{HandlerConfig, HandlerKind};

    struct StaticSource(EventQueue);

    impl EventSource for StaticSource {
        fn source_name(&self) -> &str {
            self.0.source()
        }
        fn drain_events(&self) -> Vec<Event> {
            self.0.drain()
        }
    }

    fn file_handler(path: &std::path::Path, min: Severity) -> HandlerConfig {
        HandlerConfig {
            name: "file".into(),
            kind: HandlerKind::File,
            path: Some(path.to_string_lossy().into_owned()),
            url: None,
            headers: BTreeMap::new(),
            min_severity: min,
            conditions: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_flush_drains_sources_and_inbox() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let config = BusConfig {
            handlers: vec![file_handler(&path, Severity::Info)],
            ..BusConfig::default()
        };
        let bus = MessageBus::new(config).unwrap();

        let queue = EventQueue::new("worker", 10);
        bus.register(Arc::new(StaticSource(queue.clone())));
        assert_eq!(bus.source_names(), vec!["worker".to_string()]);

        queue.emit(Severity::Info, "from source");
        queue.emit(Severity::Debug, "too quiet");
        bus.push(Event::new("direct", Severity::Error, "pushed"));

        assert_eq!(bus.flush().await, 3);
        assert_eq!(bus.flush().await, 0);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        let stats = bus.stats();
        assert_eq!(stats.flushed, 3);
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_block_others() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ok.jsonl");
        let config = BusConfig {
            handlers: vec![
                HandlerConfig {
                    name: "hook".into(),
                    kind: HandlerKind::Webhook,
                    path: None,
                    url: Some("http://127.0.0.1:9/hook".into()),
                    headers: BTreeMap::new(),
                    min_severity: Severity::Debug,
                    conditions: Vec::new(),
                },
                file_handler(&path, Severity::Debug),
            ],
            ..BusConfig::default()
        };
        let bus = MessageBus::new(config).unwrap();
        bus.push(Event::new("x", Severity::Warn, "hello"));
        bus.flush().await;
        let stats = bus.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.delivered, 1);
        assert!(path.exists());
    }

    #[test]
    fn test_bad_handler_config_rejected() {
        let config = BusConfig {
            handlers: vec![HandlerConfig {
                name: "broken".into(),
                kind: HandlerKind::Webhook,
                path: None,
                url: None,
                headers: BTreeMap::new(),
                min_severity: Severity::Info,
                conditions: Vec::new(),
            }],
            ..BusConfig::default()
        };
        assert!(MessageBus::new(config).is_err());
    }

    #[tokio::test]
    async fn test_component_lifecycle_flushes_on_stop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let config = BusConfig {
            interval_secs: 3600.0,
            handlers: vec![file_handler(&path, Severity::Info)],
            ..BusConfig::default()
        };
        let bus = MessageBus::new(config).unwrap();
        bus.start().await.unwrap();
        assert!(bus.is_running());
        bus.push(Event::new("x", Severity::Info, "last words"));
        bus.stop().await.unwrap();
        assert!(!bus.is_running());
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("last words"));

        assert!(bus.restart().await.unwrap());
        bus.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_loop_delivers_periodically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let config = BusConfig {
            interval_secs: 0.01,
            handlers: vec![file_handler(&path, Severity::Info)],
            ..BusConfig::default()
        };
        let bus = MessageBus::new(config).unwrap();
        bus.start().await.unwrap();
        bus.push(Event::new("x", Severity::Info, "tick"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(path.exists());
        bus.stop().await.unwrap();
    }
}

//! Aggregate health of the runtime's supervised components.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use taskvault_core::{Component, ComponentStatus};
use taskvault_scheduler::{QueueCounts, Vault};

/// Point-in-time health report.
#[derive(Debug, Clone, Serialize)]
pub struct Health {
    /// True when every supervised component is running.
    pub healthy: bool,
    pub uptime_secs: u64,
    pub components: Vec<ComponentStatus>,
    pub queues: QueueCounts,
}

/// Cheap, cloneable handle that can produce a `Health` report on demand.
#[derive(Clone)]
pub struct HealthProbe {
    vault: Arc<Vault>,
    components: Vec<Arc<dyn Component>>,
    started: Instant,
}

impl HealthProbe {
    pub fn new(vault: Arc<Vault>, components: Vec<Arc<dyn Component>>) -> Self {
        Self {
            vault,
            components,
            started: Instant::now(),
        }
    }

    pub fn check(&self) -> Health {
        let components: Vec<ComponentStatus> =
            self.components.iter().map(|c| c.status()).collect();
        Health {
            healthy: components.iter().all(|c| c.running),
            uptime_secs: self.started.elapsed().as_secs(),
            components,
            queues: self.vault.queue_counts(),
        }
    }
}

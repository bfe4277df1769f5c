//! Runtime: wires the vault, bus, recipe loader, sentry and API into one process.
//!
//! Start order: bus → vault → recipes → sentry → api.
//! Stop order is the reverse, with running executions drained before the
//! bus does its final flush.

use std::sync::Arc;

use taskvault_bus::MessageBus;
use taskvault_core::{Component, EventSource, Result, TaskVaultConfig};
use taskvault_scheduler::{KindRegistry, Vault};

use crate::api::{ApiServer, AppState};
use crate::health::{Health, HealthProbe};
use crate::recipes::RecipeLoader;
use crate::sentry::Sentry;

pub struct Runtime {
    config: TaskVaultConfig,
    vault: Arc<Vault>,
    bus: Arc<MessageBus>,
    recipes: Option<Arc<RecipeLoader>>,
    sentry: Arc<Sentry>,
    api: Option<Arc<ApiServer>>,
    probe: HealthProbe,
}

impl Runtime {
    pub fn new(config: TaskVaultConfig) -> Result<Self> {
        Self::with_registry(config, KindRegistry::builtin())
    }

    /// Build with a custom set of task kinds.
    pub fn with_registry(config: TaskVaultConfig, registry: KindRegistry) -> Result<Self> {
        config.validate()?;

        let vault = Arc::new(Vault::with_registry(
            config.vault.clone(),
            config.tasks.clone(),
            registry,
        ));
        let bus = Arc::new(MessageBus::new(config.bus.clone())?);
        let recipes = config
            .recipes
            .enabled
            .then(|| Arc::new(RecipeLoader::new(config.recipes.clone(), Arc::clone(&vault))));
        let sentry = Arc::new(Sentry::new(config.sentry.clone()));

        bus.register(Arc::clone(&vault) as Arc<dyn EventSource>);
        bus.register(Arc::clone(&sentry) as Arc<dyn EventSource>);
        if let Some(loader) = &recipes {
            bus.register(Arc::clone(loader) as Arc<dyn EventSource>);
        }

        let mut supervised: Vec<Arc<dyn Component>> = vec![
            Arc::clone(&vault) as Arc<dyn Component>,
            Arc::clone(&bus) as Arc<dyn Component>,
        ];
        if let Some(loader) = &recipes {
            supervised.push(Arc::clone(loader) as Arc<dyn Component>);
        }
        for component in &supervised {
            sentry.manage(Arc::clone(component));
        }

        let mut watched = supervised;
        if config.sentry.enabled {
            watched.push(Arc::clone(&sentry) as Arc<dyn Component>);
        }
        let probe = HealthProbe::new(Arc::clone(&vault), watched);

        let api = config.api.enabled.then(|| {
            Arc::new(ApiServer::new(
                config.api.clone(),
                AppState {
                    vault: Arc::clone(&vault),
                    health: probe.clone(),
                },
            ))
        });

        Ok(Self {
            config,
            vault,
            bus,
            recipes,
            sentry,
            api,
            probe,
        })
    }

    pub fn config(&self) -> &TaskVaultConfig {
        &self.config
    }

    pub fn vault(&self) -> &Arc<Vault> {
        &self.vault
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn sentry(&self) -> &Arc<Sentry> {
        &self.sentry
    }

    pub fn recipes(&self) -> Option<&Arc<RecipeLoader>> {
        self.recipes.as_ref()
    }

    pub fn health(&self) -> Health {
        self.probe.check()
    }

    pub async fn start(&self) -> Result<()> {
        tracing::info!("🚀 TaskVault v{} starting", env!("CARGO_PKG_VERSION"));
        self.bus.start().await?;
        self.vault.start().await?;
        if let Some(loader) = &self.recipes {
            loader.start().await?;
        }
        if self.config.sentry.enabled {
            self.sentry.start().await?;
        }
        if let Some(api) = &self.api {
            api.start().await?;
        }
        tracing::info!("✅ TaskVault running");
        Ok(())
    }

    pub async fn stop(&self) {
        tracing::info!("🛑 TaskVault shutting down");
        if let Some(api) = &self.api {
            stop_logged(&**api).await;
        }
        stop_logged(&*self.sentry).await;
        if let Some(loader) = &self.recipes {
            stop_logged(&**loader).await;
        }
        stop_logged(&*self.vault).await;

        let aborted = self
            .vault
            .shutdown_tasks(self.config.vault.cancel_grace())
            .await;
        if aborted > 0 {
            tracing::warn!("⚠️ {aborted} task(s) aborted at shutdown");
        }

        // last, so the cancellations above still reach the handlers
        stop_logged(&*self.bus).await;
        tracing::info!("👋 TaskVault stopped");
    }

    /// Start everything, wait for Ctrl-C, then stop.
    pub async fn run_until_shutdown(&self) -> Result<()> {
        if let Err(e) = self.start().await {
            self.stop().await;
            return Err(e);
        }
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("❌ Cannot listen for shutdown signal: {e}");
        }
        self.stop().await;
        Ok(())
    }
}

async fn stop_logged(component: &dyn Component) {
    if let Err(e) = component.stop().await {
        tracing::warn!("⚠️ Stopping '{}' failed: {e}", component.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use taskvault_core::config::{ApiConfig, RecipesConfig, SentryConfig, VaultConfig};

    fn config(recipes: Option<&std::path::Path>) -> TaskVaultConfig {
        TaskVaultConfig {
            vault: VaultConfig {
                interval_secs: 0.02,
                ..VaultConfig::default()
            },
            sentry: SentryConfig {
                enabled: true,
                interval_secs: 0.05,
                initial_delay_secs: 0.0,
                restart_grace_secs: 0.01,
            },
            recipes: RecipesConfig {
                enabled: recipes.is_some(),
                path: recipes
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                interval_secs: 0.05,
            },
            api: ApiConfig {
                enabled: false,
                ..ApiConfig::default()
            },
            ..TaskVaultConfig::default()
        }
    }

    async fn wait_for(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..100 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_start_runs_tasks_and_stop_drains() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("nap.toml"), "type = \"sleep\"\nseconds = 0\n").unwrap();
        let runtime = Runtime::new(config(Some(dir.path()))).unwrap();
        assert!(!runtime.health().healthy);

        runtime.start().await.unwrap();
        let health = runtime.health();
        assert!(health.healthy);
        let names: Vec<&str> = health.components.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["vault", "bus", "recipes", "sentry"]);

        let vault = Arc::clone(runtime.vault());
        assert!(wait_for(|| vault.queue_counts().done == 1).await);

        let id = vault
            .submit_payload(&serde_json::json!({"type": "sleep", "name": "long", "seconds": 60}))
            .unwrap();
        assert!(wait_for(|| vault.queue_counts().running == 1).await);

        runtime.stop().await;
        assert!(!runtime.health().healthy);
        assert_eq!(
            vault.get(id).unwrap().status,
            taskvault_scheduler::TaskStatus::Canceled
        );
    }

    #[tokio::test]
    async fn test_sentry_restarts_a_stopped_vault() {
        let runtime = Runtime::new(config(None)).unwrap();
        runtime.start().await.unwrap();
        runtime.vault().stop().await.unwrap();
        assert!(!runtime.vault().is_running());

        let vault = Arc::clone(runtime.vault());
        assert!(wait_for(|| vault.is_running()).await);
        // the report lands after the restart grace, not when the vault comes back
        let sentry = Arc::clone(runtime.sentry());
        assert!(wait_for(|| sentry.last_report().is_some_and(|r| r.succeeded >= 1)).await);
        runtime.stop().await;
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut cfg = config(None);
        cfg.vault.interval_secs = 0.0;
        assert!(Runtime::new(cfg).is_err());
    }

    #[test]
    fn test_sources_registered_with_bus() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Runtime::new(config(Some(dir.path()))).unwrap();
        assert_eq!(
            runtime.bus().source_names(),
            vec!["vault".to_string(), "sentry".into(), "recipes".into()]
        );
        assert_eq!(runtime.sentry().managed().len(), 3);
        assert!(runtime.recipes().is_some());
    }
}

//! TaskVault configuration system.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, VaultError};
use crate::event::Severity;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskVaultConfig {
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub tasks: TaskDefaults,
    #[serde(default)]
    pub sentry: SentryConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub recipes: RecipesConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

impl TaskVaultConfig {
    /// Load config from the default path (~/.taskvault/taskvault.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| VaultError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| VaultError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to a path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| VaultError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("taskvault.toml")
    }

    /// Get the TaskVault home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".taskvault")
    }

    /// Construction-time sanity checks.
    pub fn validate(&self) -> Result<()> {
        positive("vault.interval_secs", self.vault.interval_secs)?;
        positive("vault.cancel_grace_secs", self.vault.cancel_grace_secs)?;
        if let Some(limit) = self.vault.weight_limit
            && !(limit >= 0.0)
        {
            return Err(VaultError::Config(format!(
                "vault.weight_limit must be >= 0 (got {limit})"
            )));
        }
        if let Some(interval) = self.vault.elevate_interval_secs {
            positive("vault.elevate_interval_secs", interval)?;
        }
        if self.tasks.default_priority > MAX_PRIORITY {
            return Err(VaultError::Config(format!(
                "tasks.default_priority must be 0..={MAX_PRIORITY}"
            )));
        }
        if !(self.tasks.default_weight >= 0.0) {
            return Err(VaultError::Config("tasks.default_weight must be >= 0".into()));
        }
        positive("sentry.interval_secs", self.sentry.interval_secs)?;
        positive("sentry.restart_grace_secs", self.sentry.restart_grace_secs)?;
        if self.sentry.initial_delay_secs < 0.0 {
            return Err(VaultError::Config("sentry.initial_delay_secs must be >= 0".into()));
        }
        positive("bus.interval_secs", self.bus.interval_secs)?;
        for handler in &self.bus.handlers {
            handler.validate()?;
        }
        positive("recipes.interval_secs", self.recipes.interval_secs)?;
        Ok(())
    }
}

/// Highest (least urgent) task priority.
pub const MAX_PRIORITY: u8 = 6;

fn positive(field: &str, value: f64) -> Result<()> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(VaultError::Config(format!("{field} must be > 0 (got {value})")))
    }
}

/// Convert float seconds to a `Duration`, falling back for invalid input.
pub fn secs(value: f64, fallback: Duration) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(fallback)
}

/// Scheduler (vault) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Tick interval in seconds.
    #[serde(default = "default_vault_interval")]
    pub interval_secs: f64,
    /// Total weight budget for running tasks. `None` = unbounded.
    #[serde(default = "default_weight_limit")]
    pub weight_limit: Option<f64>,
    /// How many terminal tasks the done queue keeps.
    #[serde(default = "default_retention")]
    pub retention: usize,
    /// Scheduler-wide priority elevation interval (tasks may override).
    #[serde(default)]
    pub elevate_interval_secs: Option<f64>,
    /// Task types or names refused at submission.
    #[serde(default)]
    pub blacklist: Vec<String>,
    /// How long a canceled execution gets to wind down before it is aborted.
    #[serde(default = "default_cancel_grace")]
    pub cancel_grace_secs: f64,
    /// Capacity of the vault's own event queue.
    #[serde(default = "default_vault_event_queue")]
    pub event_queue_size: usize,
}

fn default_vault_interval() -> f64 { 0.1 }
fn default_weight_limit() -> Option<f64> { Some(10.0) }
fn default_retention() -> usize { 100 }
fn default_cancel_grace() -> f64 { 2.0 }
fn default_vault_event_queue() -> usize { 500 }

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_vault_interval(),
            weight_limit: default_weight_limit(),
            retention: default_retention(),
            elevate_interval_secs: None,
            blacklist: Vec::new(),
            cancel_grace_secs: default_cancel_grace(),
            event_queue_size: default_vault_event_queue(),
        }
    }
}

impl VaultConfig {
    pub fn interval(&self) -> Duration {
        secs(self.interval_secs, Duration::from_millis(100))
    }

    pub fn cancel_grace(&self) -> Duration {
        secs(self.cancel_grace_secs, Duration::from_secs(2))
    }
}

/// Defaults applied to tasks that do not set these fields themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefaults {
    #[serde(default = "default_priority")]
    pub default_priority: u8,
    #[serde(default = "default_weight")]
    pub default_weight: f64,
    /// Ring buffer size of each task's execution history.
    #[serde(default = "default_history_size")]
    pub history_size: usize,
    /// Capacity of each task's outbound event queue.
    #[serde(default = "default_task_event_queue")]
    pub event_queue_size: usize,
}

fn default_priority() -> u8 { 3 }
fn default_weight() -> f64 { 1.0 }
fn default_history_size() -> usize { 10 }
fn default_task_event_queue() -> usize { 100 }

impl Default for TaskDefaults {
    fn default() -> Self {
        Self {
            default_priority: default_priority(),
            default_weight: default_weight(),
            history_size: default_history_size(),
            event_queue_size: default_task_event_queue(),
        }
    }
}

/// Supervisor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentryConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_sentry_interval")]
    pub interval_secs: f64,
    #[serde(default = "default_sentry_delay")]
    pub initial_delay_secs: f64,
    /// Wait after a restart before re-checking the component.
    #[serde(default = "default_restart_grace")]
    pub restart_grace_secs: f64,
}

fn bool_true() -> bool { true }
fn default_sentry_interval() -> f64 { 60.0 }
fn default_sentry_delay() -> f64 { 10.0 }
fn default_restart_grace() -> f64 { 1.0 }

impl Default for SentryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_sentry_interval(),
            initial_delay_secs: default_sentry_delay(),
            restart_grace_secs: default_restart_grace(),
        }
    }
}

/// Message bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_bus_interval")]
    pub interval_secs: f64,
    /// Capacity of the bus's own inbound queue (direct pushes).
    #[serde(default = "default_bus_queue")]
    pub queue_size: usize,
    #[serde(default = "default_handlers")]
    pub handlers: Vec<HandlerConfig>,
}

fn default_bus_interval() -> f64 { 0.5 }
fn default_bus_queue() -> usize { 1000 }
fn default_handlers() -> Vec<HandlerConfig> {
    vec![HandlerConfig {
        name: "log".into(),
        kind: HandlerKind::Log,
        path: None,
        url: None,
        headers: BTreeMap::new(),
        min_severity: Severity::Info,
        conditions: Vec::new(),
    }]
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_bus_interval(),
            queue_size: default_bus_queue(),
            handlers: default_handlers(),
        }
    }
}

/// Kind of message handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    Log,
    File,
    Webhook,
}

/// One message handler attached to the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: HandlerKind,
    /// File handler: target file (JSON lines).
    #[serde(default)]
    pub path: Option<String>,
    /// Webhook handler: target URL.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_min_severity")]
    pub min_severity: Severity,
    /// All conditions must match for an event to be handled.
    #[serde(default)]
    pub conditions: Vec<ConditionConfig>,
}

fn default_min_severity() -> Severity { Severity::Info }

impl HandlerConfig {
    pub fn validate(&self) -> Result<()> {
        match self.kind {
            HandlerKind::File if self.path.as_deref().is_none_or(str::is_empty) => Err(
                VaultError::Config(format!("handler '{}': file handler needs 'path'", self.name)),
            ),
            HandlerKind::Webhook if self.url.as_deref().is_none_or(str::is_empty) => Err(
                VaultError::Config(format!("handler '{}': webhook handler needs 'url'", self.name)),
            ),
            _ => Ok(()),
        }
    }
}

/// Comparison used by an alert condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Contains,
    Matches,
    Exists,
    Missing,
}

/// `field <op> value` filter evaluated against each event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionConfig {
    pub field: String,
    pub op: ConditionOp,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

/// Recipe loader configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipesConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_recipes_path")]
    pub path: String,
    #[serde(default = "default_recipes_interval")]
    pub interval_secs: f64,
}

fn default_recipes_path() -> String { "~/.taskvault/recipes".into() }
fn default_recipes_interval() -> f64 { 30.0 }

impl Default for RecipesConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_recipes_path(),
            interval_secs: default_recipes_interval(),
        }
    }
}

impl RecipesConfig {
    /// Recipe directory with `~` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }
}

/// HTTP control plane configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String { "127.0.0.1".into() }
fn default_port() -> u16 { 7070 }

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
        }
    }
}

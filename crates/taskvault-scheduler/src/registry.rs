//! Kind registry: turns a language-neutral submission payload into a `Task`.
//!
//! A payload is a JSON/TOML object with the common scheduling fields plus
//! whatever the selected kind needs:
//!
//! ```json
//! { "type": "command", "name": "backup", "priority": 2, "weight": 3,
//!   "repeat": "every 1h", "timeout": 600, "command": "/usr/local/bin/backup" }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use taskvault_core::config::{MAX_PRIORITY, TaskDefaults};
use taskvault_core::{Result, VaultError};

use crate::kinds::command::CommandTask;
use crate::kinds::message::MessageTask;
use crate::kinds::poll::PollTask;
use crate::kinds::script::ScriptTask;
use crate::kinds::sleep::SleepTask;
use crate::kinds::watch_folder::WatchFolderTask;
use crate::repeat::Repeat;
use crate::runnable::Runnable;
use crate::task::{Task, TaskId};

/// Builds a runnable from the raw payload.
pub type KindBuilder = Arc<dyn Fn(&serde_json::Value) -> Result<Arc<dyn Runnable>> + Send + Sync>;

/// Scheduling fields shared by every kind.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskPayload {
    #[serde(rename = "type", alias = "class", alias = "kind")]
    pub kind: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub id: Option<TaskId>,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub repeat: serde_json::Value,
    #[serde(default)]
    pub delay: Option<f64>,
    #[serde(default)]
    pub timeout: Option<f64>,
    #[serde(default)]
    pub run_limit: Option<i64>,
    #[serde(default)]
    pub elevate_interval: Option<f64>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub history_size: Option<usize>,
}

impl TaskPayload {
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        if !value.is_object() {
            return Err(VaultError::InvalidPayload(
                "task payload must be an object".into(),
            ));
        }
        let payload: Self = serde_json::from_value(value.clone())
            .map_err(|e| VaultError::InvalidPayload(e.to_string()))?;
        payload.validate()?;
        Ok(payload)
    }

    /// Range checks on the common fields.
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(VaultError::InvalidPayload(msg));
        if self.kind.trim().is_empty() {
            return bad("missing task type".into());
        }
        if let Some(p) = self.priority
            && !(0..=i64::from(MAX_PRIORITY)).contains(&p)
        {
            return bad(format!("priority must be 0..={MAX_PRIORITY}, got {p}"));
        }
        if let Some(w) = self.weight
            && (!w.is_finite() || w < 0.0)
        {
            return bad(format!("weight must be >= 0, got {w}"));
        }
        if let Some(d) = self.delay
            && (!d.is_finite() || d < 0.0)
        {
            return bad(format!("delay must be >= 0, got {d}"));
        }
        if let Some(t) = self.timeout
            && (!t.is_finite() || t <= 0.0)
        {
            return bad(format!("timeout must be > 0, got {t}"));
        }
        if let Some(limit) = self.run_limit
            && limit < 1
        {
            return bad(format!("run_limit must be >= 1, got {limit}"));
        }
        if let Some(i) = self.elevate_interval
            && (!i.is_finite() || i <= 0.0)
        {
            return bad(format!("elevate_interval must be > 0, got {i}"));
        }
        Ok(())
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.kind)
    }
}

/// Map from type tag to builder. Unknown tags fail with `UnknownKind`.
#[derive(Clone)]
pub struct KindRegistry {
    builders: HashMap<String, KindBuilder>,
}

impl std::fmt::Debug for KindRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KindRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl Default for KindRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl KindRegistry {
    pub fn empty() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// Registry with every built-in kind.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(CommandTask::KIND, |p| {
            Ok(Arc::new(CommandTask::from_payload(p)?) as Arc<dyn Runnable>)
        });
        registry.register(ScriptTask::KIND, |p| {
            Ok(Arc::new(ScriptTask::from_payload(p)?) as Arc<dyn Runnable>)
        });
        registry.register(SleepTask::KIND, |p| {
            Ok(Arc::new(SleepTask::from_payload(p)?) as Arc<dyn Runnable>)
        });
        registry.register(MessageTask::KIND, |p| {
            Ok(Arc::new(MessageTask::from_payload(p)?) as Arc<dyn Runnable>)
        });
        registry.register(PollTask::KIND, |p| {
            Ok(Arc::new(PollTask::from_payload(p)?) as Arc<dyn Runnable>)
        });
        registry.register(WatchFolderTask::KIND, |p| {
            Ok(Arc::new(WatchFolderTask::from_payload(p)?) as Arc<dyn Runnable>)
        });
        registry
    }

    pub fn register<F>(&mut self, kind: &str, builder: F)
    where
        F: Fn(&serde_json::Value) -> Result<Arc<dyn Runnable>> + Send + Sync + 'static,
    {
        self.builders.insert(kind.to_lowercase(), Arc::new(builder));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.builders.contains_key(&kind.to_lowercase())
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.builders.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Build the runnable for `kind` from the full payload.
    pub fn build_runnable(&self, kind: &str, payload: &serde_json::Value) -> Result<Arc<dyn Runnable>> {
        let builder = self
            .builders
            .get(&kind.to_lowercase())
            .ok_or_else(|| VaultError::UnknownKind(kind.to_string()))?;
        builder(payload)
    }

    /// Validate a payload and construct the task. Nothing is created on error.
    pub fn build_task(&self, value: &serde_json::Value, defaults: &TaskDefaults) -> Result<Task> {
        let payload = TaskPayload::from_value(value)?;
        let runnable = self.build_runnable(&payload.kind, value)?;

        let priority = payload
            .priority
            .map(|p| p as u8)
            .unwrap_or(defaults.default_priority);
        let run_limit = payload
            .run_limit
            .map(|l| u32::try_from(l).unwrap_or(u32::MAX));

        let mut task = Task::new(payload.display_name(), runnable)
            .with_priority(priority)
            .with_weight(payload.weight.unwrap_or(defaults.default_weight))
            .with_repeat(Repeat::from_value(&payload.repeat))
            .with_delay(payload.delay.unwrap_or(0.0))
            .with_timeout(payload.timeout)
            .with_run_limit(run_limit)
            .with_elevate_interval(payload.elevate_interval)
            .with_dependencies(payload.dependencies.clone())
            .with_history_size(payload.history_size.unwrap_or(defaults.history_size))
            .with_event_capacity(defaults.event_queue_size);
        task.id = payload.id;
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn defaults() -> TaskDefaults {
        TaskDefaults::default()
    }

    #[test]
    fn test_builds_command_task() {
        let reg = KindRegistry::builtin();
        let task = reg
            .build_task(
                &json!({
                    "type": "command",
                    "name": "backup",
                    "priority": 2,
                    "weight": 3,
                    "repeat": "every 1h",
                    "timeout": 600,
                    "run_limit": 4,
                    "command": "/usr/local/bin/backup"
                }),
                &defaults(),
            )
            .unwrap();
        assert_eq!(task.name, "backup");
        assert_eq!(task.kind(), "command");
        assert_eq!(task.priority, 2);
        assert_eq!(task.initial_priority, 2);
        assert_eq!(task.weight, 3.0);
        assert_eq!(task.timeout, Some(600.0));
        assert_eq!(task.run_limit, Some(4));
        assert_eq!(task.repeat.to_string(), "every 1h");
    }

    #[test]
    fn test_defaults_and_class_alias() {
        let reg = KindRegistry::builtin();
        let task = reg
            .build_task(&json!({"class": "sleep", "seconds": 1}), &defaults())
            .unwrap();
        assert_eq!(task.name, "sleep");
        assert_eq!(task.priority, defaults().default_priority);
        assert_eq!(task.weight, defaults().default_weight);
        assert_eq!(task.repeat, Repeat::Never);
    }

    #[test]
    fn test_unknown_kind() {
        let reg = KindRegistry::builtin();
        let err = reg
            .build_task(&json!({"type": "teleport"}), &defaults())
            .unwrap_err();
        assert!(matches!(err, VaultError::UnknownKind(k) if k == "teleport"));
    }

    #[test]
    fn test_invalid_payloads() {
        let reg = KindRegistry::builtin();
        for bad in [
            json!("not an object"),
            json!({"name": "no type"}),
            json!({"type": "sleep", "priority": 9}),
            json!({"type": "sleep", "priority": -1}),
            json!({"type": "sleep", "weight": -2}),
            json!({"type": "sleep", "timeout": 0}),
            json!({"type": "sleep", "run_limit": 0}),
            json!({"type": "sleep", "delay": "soon"}),
            json!({"type": "command"}),
        ] {
            let err = reg.build_task(&bad, &defaults()).unwrap_err();
            assert!(
                matches!(err, VaultError::InvalidPayload(_)),
                "{bad} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_custom_kind() {
        let mut reg = KindRegistry::empty();
        reg.register("nap", |_| Ok(Arc::new(SleepTask::new(0.0)) as Arc<dyn Runnable>));
        assert!(reg.contains("NAP"));
        assert_eq!(reg.kinds(), vec!["nap".to_string()]);
        assert!(reg.build_runnable("command", &json!({})).is_err());
    }
}

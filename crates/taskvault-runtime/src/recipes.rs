//! Recipe loader: turns task files on disk into vault submissions.
//!
//! Watches one directory for `*.toml` and `*.json` recipes. A recipe holds a
//! single task payload, or a `tasks = [...]` list of them. Files are tracked
//! by content: a changed file deletes the tasks it submitted last time and
//! submits its new contents, a deleted file cancels its tasks.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use taskvault_core::config::{RecipesConfig, secs};
use taskvault_core::{
    Component, Event, EventQueue, EventSource, Result, ServiceLoop, Severity, VaultError,
};
use taskvault_scheduler::{TaskId, Vault};

const LOADER_NAME: &str = "recipes";

/// Outcome of one directory scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// New files picked up.
    pub loaded: usize,
    /// Known files whose content changed.
    pub reloaded: usize,
    /// Files that disappeared.
    pub removed: usize,
    /// Files that failed to read or parse, plus rejected payloads.
    pub failed: usize,
    /// Tasks submitted to the vault.
    pub submitted: usize,
}

#[derive(Debug)]
struct TrackedFile {
    content: String,
    task_ids: Vec<TaskId>,
}

struct LoaderShared {
    config: RecipesConfig,
    vault: Arc<Vault>,
    files: Mutex<HashMap<PathBuf, TrackedFile>>,
    events: EventQueue,
}

pub struct RecipeLoader {
    shared: Arc<LoaderShared>,
    service: ServiceLoop,
}

impl RecipeLoader {
    pub fn new(config: RecipesConfig, vault: Arc<Vault>) -> Self {
        Self {
            shared: Arc::new(LoaderShared {
                config,
                vault,
                files: Mutex::new(HashMap::new()),
                events: EventQueue::new(LOADER_NAME, 200),
            }),
            service: ServiceLoop::new(LOADER_NAME),
        }
    }

    pub fn directory(&self) -> PathBuf {
        self.shared.config.resolved_path()
    }

    /// Scan the recipe directory once.
    pub fn scan(&self) -> ScanReport {
        self.shared.scan()
    }

    /// Task ids submitted from `path` by the latest load of it.
    pub fn tasks_from(&self, path: &Path) -> Vec<TaskId> {
        self.shared
            .files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .map(|f| f.task_ids.clone())
            .unwrap_or_default()
    }

    pub fn tracked_files(&self) -> usize {
        self.shared
            .files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

/// Whether the loader reads this file.
pub fn is_recipe(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("toml") || e.eq_ignore_ascii_case("json"))
}

/// Read and parse a recipe file into task payloads.
pub fn load_recipe(path: &Path) -> Result<Vec<Value>> {
    let content = std::fs::read_to_string(path)?;
    parse_recipe(path, &content)
}

/// Parse recipe text. The format follows the file extension; payloads
/// without a `name` are named after the file (`stem`, or `stem-N` in a list).
pub fn parse_recipe(path: &Path, content: &str) -> Result<Vec<Value>> {
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    let doc: Value = if is_json {
        serde_json::from_str(content)?
    } else {
        toml::from_str(content)
            .map_err(|e| VaultError::InvalidPayload(format!("{}: {e}", path.display())))?
    };

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("recipe")
        .to_string();

    let (mut payloads, listed) = match doc {
        Value::Object(mut map) if map.contains_key("tasks") => match map.remove("tasks") {
            Some(Value::Array(items)) => (items, true),
            _ => {
                return Err(VaultError::InvalidPayload(format!(
                    "{}: 'tasks' must be a list",
                    path.display()
                )));
            }
        },
        Value::Array(items) => (items, true),
        single @ Value::Object(_) => (vec![single], false),
        _ => {
            return Err(VaultError::InvalidPayload(format!(
                "{}: expected a task table or a list of tasks",
                path.display()
            )));
        }
    };

    for (i, payload) in payloads.iter_mut().enumerate() {
        let Value::Object(map) = payload else {
            return Err(VaultError::InvalidPayload(format!(
                "{}: task #{} is not a table",
                path.display(),
                i + 1
            )));
        };
        if !map.get("name").is_some_and(Value::is_string) {
            let name = if listed {
                format!("{stem}-{}", i + 1)
            } else {
                stem.clone()
            };
            map.insert("name".into(), Value::String(name));
        }
    }
    Ok(payloads)
}

impl LoaderShared {
    fn scan(&self) -> ScanReport {
        let dir = self.config.resolved_path();
        let mut report = ScanReport::default();

        let present: Vec<PathBuf> = match std::fs::read_dir(&dir) {
            Ok(entries) => {
                let mut paths: Vec<PathBuf> = entries
                    .filter_map(|e| e.ok().map(|e| e.path()))
                    .filter(|p| is_recipe(p))
                    .collect();
                paths.sort();
                paths
            }
            Err(e) => {
                tracing::debug!("📂 Recipe directory {} unreadable: {e}", dir.display());
                Vec::new()
            }
        };

        let mut files = self.files.lock().unwrap_or_else(|e| e.into_inner());

        let gone: Vec<PathBuf> = files
            .keys()
            .filter(|p| !present.contains(p))
            .cloned()
            .collect();
        for path in gone {
            if let Some(old) = files.remove(&path) {
                report.removed += 1;
                let canceled = self.cancel_all(&old.task_ids);
                tracing::info!(
                    "🗑️ Recipe removed: {} ({canceled} task(s) canceled)",
                    path.display()
                );
                self.events
                    .emit(Severity::Info, format!("recipe removed: {}", path.display()));
            }
        }

        for path in present {
            let content = match std::fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    report.failed += 1;
                    self.failure(&path, &format!("read failed: {e}"));
                    continue;
                }
            };
            let previous = match files.get(&path) {
                Some(known) if known.content == content => continue,
                Some(known) => Some(known.task_ids.clone()),
                None => None,
            };

            if let Some(old_ids) = &previous {
                report.reloaded += 1;
                // deleted rather than canceled, so a recipe with a fixed `id` can reuse it
                let deleted = self.delete_all(old_ids);
                tracing::info!(
                    "🔄 Recipe changed: {} ({deleted} old task(s) deleted)",
                    path.display()
                );
            } else {
                report.loaded += 1;
                tracing::info!("📜 Recipe found: {}", path.display());
            }

            let mut task_ids = Vec::new();
            match parse_recipe(&path, &content) {
                Ok(payloads) => {
                    for payload in &payloads {
                        match self.vault.submit_payload(payload) {
                            Ok(id) => task_ids.push(id),
                            Err(e) => {
                                report.failed += 1;
                                self.failure(&path, &e.to_string());
                            }
                        }
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    self.failure(&path, &e.to_string());
                }
            }
            report.submitted += task_ids.len();
            // remember the content even on failure so a broken file is not retried every scan
            files.insert(path, TrackedFile { content, task_ids });
        }

        if report.loaded + report.reloaded + report.removed > 0 {
            tracing::info!(
                "📜 Recipes: {} new, {} changed, {} removed, {} task(s) submitted, {} failure(s)",
                report.loaded,
                report.reloaded,
                report.removed,
                report.submitted,
                report.failed
            );
        }
        report
    }

    fn cancel_all(&self, ids: &[TaskId]) -> usize {
        ids.iter()
            .filter(|id| matches!(self.vault.cancel(**id), Ok(true)))
            .count()
    }

    fn delete_all(&self, ids: &[TaskId]) -> usize {
        ids.iter()
            .filter(|id| self.vault.delete(**id).is_ok())
            .count()
    }

    fn failure(&self, path: &Path, reason: &str) {
        tracing::warn!("⚠️ Recipe {}: {reason}", path.display());
        self.events.push(
            Event::new(LOADER_NAME, Severity::Error, format!("recipe {}: {reason}", path.display()))
                .with_tags(["recipe"])
                .with_data(serde_json::json!({ "path": path.display().to_string() })),
        );
    }
}

async fn run_loop(shared: Arc<LoaderShared>, token: CancellationToken) {
    let interval = secs(shared.config.interval_secs, Duration::from_secs(30));
    tracing::info!(
        "📂 Recipe loader watching {} (every {interval:?})",
        shared.config.resolved_path().display()
    );
    loop {
        // directory reads block; keep them off the async workers
        let scanner = Arc::clone(&shared);
        if let Err(e) = tokio::task::spawn_blocking(move || scanner.scan()).await {
            tracing::error!("❌ Recipe scan aborted: {e}");
        }
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    tracing::info!("🛑 Recipe loader stopped");
}

#[async_trait]
impl Component for RecipeLoader {
    fn name(&self) -> &str {
        LOADER_NAME
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
        self.service.shutdown(Duration::from_secs(2)).await;
        Ok(())
    }
}

impl EventSource for RecipeLoader {
    fn source_name(&self) -> &str {
        LOADER_NAME
    }

    fn drain_events(&self) -> Vec<Event> {
        self.shared.events.drain()
    }
}

impl Drop for RecipeLoader {
    fn drop(&mut self) {
        self.service.abort();
    }
}

//! Watch-folder kind: report files that appeared since the previous run.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;

use taskvault_core::{Event, Result, Severity, VaultError};

use crate::runnable::{Runnable, TaskContext};

#[derive(Debug, Deserialize)]
pub struct WatchFolderTask {
    pub path: String,
    /// Only report files with one of these extensions (without the dot).
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(skip)]
    seen: Mutex<HashSet<PathBuf>>,
}

impl WatchFolderTask {
    pub const KIND: &'static str = "watch_folder";

    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            extensions: Vec::new(),
            seen: Mutex::new(HashSet::new()),
        }
    }

    pub fn from_payload(payload: &serde_json::Value) -> Result<Self> {
        let task: Self = super::params(Self::KIND, payload)?;
        if task.path.trim().is_empty() {
            return Err(VaultError::InvalidPayload("watch_folder: empty path".into()));
        }
        Ok(task)
    }

    fn wanted(&self, path: &std::path::Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                self.extensions
                    .iter()
                    .any(|want| want.trim_start_matches('.').eq_ignore_ascii_case(ext))
            })
    }

    async fn scan(&self) -> Result<HashSet<PathBuf>> {
        let dir = PathBuf::from(shellexpand::tilde(&self.path).as_ref());
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| {
            VaultError::Execution(format!("cannot read {}: {e}", dir.display()))
        })?;
        let mut found = HashSet::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_file() && self.wanted(&path) {
                found.insert(path);
            }
        }
        Ok(found)
    }
}

#[async_trait]
impl Runnable for WatchFolderTask {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<Option<String>> {
        let current = self.scan().await?;
        let mut fresh: Vec<PathBuf> = {
            let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
            let fresh = current.difference(&seen).cloned().collect();
            *seen = current;
            fresh
        };
        fresh.sort();
        for path in &fresh {
            let event = Event::new(&ctx.name, Severity::Info, format!("new file {}", path.display()))
                .with_tags(["watch_folder"])
                .with_data(serde_json::json!({ "path": path.display().to_string() }));
            ctx.push(event);
        }
        Ok(Some(format!("{} new file(s)", fresh.len())))
    }
}

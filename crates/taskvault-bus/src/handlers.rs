//! Message handlers: where drained events end up.
//! Supports: tracing log, JSON-lines file, HTTP webhook.

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::AsyncWriteExt;

use taskvault_core::config::{HandlerConfig, HandlerKind};
use taskvault_core::{Event, Result, Severity, VaultError};

use crate::condition::Condition;

/// Handler target.
#[derive(Debug, Clone)]
pub enum HandlerTarget {
    /// Re-emit through `tracing` at the matching level.
    Log,
    /// Append one JSON object per line.
    File { path: PathBuf },
    /// POST each event as JSON.
    Webhook {
        url: String,
        headers: Vec<(String, String)>,
    },
}

/// A configured handler: target plus filters.
#[derive(Debug, Clone)]
pub struct Handler {
    pub name: String,
    pub target: HandlerTarget,
    pub min_severity: Severity,
    conditions: Vec<Condition>,
}

impl Handler {
    pub fn from_config(config: &HandlerConfig) -> Result<Self> {
        config.validate()?;
        let target = match config.kind {
            HandlerKind::Log => HandlerTarget::Log,
            HandlerKind::File => HandlerTarget::File {
                path: PathBuf::from(
                    shellexpand::tilde(config.path.as_deref().unwrap_or_default()).as_ref(),
                ),
            },
            HandlerKind::Webhook => HandlerTarget::Webhook {
                url: config.url.clone().unwrap_or_default(),
                headers: config
                    .headers
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            },
        };
        let conditions = config
            .conditions
            .iter()
            .map(Condition::compile)
            .collect::<Result<Vec<_>>>()
            .map_err(|e| VaultError::Config(format!("handler '{}': {e}", config.name)))?;
        Ok(Self {
            name: config.name.clone(),
            target,
            min_severity: config.min_severity,
            conditions,
        })
    }

    /// Severity floor and every condition must pass.
    pub fn accepts(&self, event: &Event) -> bool {
        event.severity >= self.min_severity && self.conditions.iter().all(|c| c.evaluate(event))
    }

    /// Deliver a batch of already-filtered events.
    pub async fn dispatch(&self, events: &[&Event], client: &reqwest::Client) -> std::result::Result<(), String> {
        if events.is_empty() {
            return Ok(());
        }
        match &self.target {
            HandlerTarget::Log => {
                for event in events {
                    log_event(event);
                }
                Ok(())
            }
            HandlerTarget::File { path } => append_lines(path, events).await,
            HandlerTarget::Webhook { url, headers } => {
                for event in events {
                    send_webhook(client, url, headers, event).await?;
                }
                Ok(())
            }
        }
    }
}

fn log_event(event: &Event) {
    let tags = event.tags.join(",");
    match event.severity {
        Severity::Debug => tracing::debug!("📨 [{}] {} {}", event.source, event.message, tags),
        Severity::Info => tracing::info!("📨 [{}] {} {}", event.source, event.message, tags),
        Severity::Warn => tracing::warn!("📨 [{}] {} {}", event.source, event.message, tags),
        Severity::Error => tracing::error!("📨 [{}] {} {}", event.source, event.message, tags),
        Severity::Fatal => tracing::error!("💀 [{}] FATAL {} {}", event.source, event.message, tags),
    }
}

async fn append_lines(path: &PathBuf, events: &[&Event]) -> std::result::Result<(), String> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("create {}: {e}", parent.display()))?;
    }
    let mut buf = String::new();
    for event in events {
        let line = serde_json::to_string(event).map_err(|e| format!("encode event: {e}"))?;
        buf.push_str(&line);
        buf.push('\n');
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| format!("open {}: {e}", path.display()))?;
    file.write_all(buf.as_bytes())
        .await
        .map_err(|e| format!("write {}: {e}", path.display()))?;
    file.flush().await.map_err(|e| format!("flush {}: {e}", path.display()))
}

/// Send one event via generic HTTP webhook.
async fn send_webhook(
    client: &reqwest::Client,
    url: &str,
    headers: &[(String, String)],
    event: &Event,
) -> std::result::Result<(), String> {
    let mut req = client
        .post(url)
        .json(event)
        .timeout(Duration::from_secs(10));

    for (key, value) in headers {
        req = req.header(key.as_str(), value.as_str());
    }

    let resp = req
        .send()
        .await
        .map_err(|e| format!("Webhook send failed: {e}"))?;

    if resp.status().is_success() {
        tracing::debug!("✅ Webhook delivered: {}", event.message);
        Ok(())
    } else {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(format!("Webhook error {status}: {body}"))
    }
}

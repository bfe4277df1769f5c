//! Poll kind: GET a URL until it answers the way we expect.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use taskvault_core::{Result, Severity, VaultError};

use crate::runnable::{Runnable, TaskContext};

use super::{MAX_OUTPUT, truncate_output};

#[derive(Debug, Clone, Deserialize)]
pub struct PollTask {
    pub url: String,
    /// Substring the body must contain. Without it any 2xx answer succeeds.
    #[serde(default)]
    pub expect: Option<String>,
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Seconds between attempts.
    #[serde(default = "default_interval")]
    pub interval: f64,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: f64,
}

fn default_attempts() -> u32 { 5 }
fn default_interval() -> f64 { 5.0 }
fn default_request_timeout() -> f64 { 10.0 }

impl PollTask {
    pub const KIND: &'static str = "poll";

    pub fn from_payload(payload: &serde_json::Value) -> Result<Self> {
        let task: Self = super::params(Self::KIND, payload)?;
        if !(task.url.starts_with("http://") || task.url.starts_with("https://")) {
            return Err(VaultError::InvalidPayload(format!(
                "poll: url must be http(s), got '{}'",
                task.url
            )));
        }
        if task.attempts == 0 {
            return Err(VaultError::InvalidPayload("poll: attempts must be >= 1".into()));
        }
        task.interval()?;
        task.request_timeout()?;
        Ok(task)
    }

    fn interval(&self) -> Result<Duration> {
        super::seconds_param(Self::KIND, "interval", self.interval, 0.0)
    }

    fn request_timeout(&self) -> Result<Duration> {
        super::seconds_param(Self::KIND, "request_timeout", self.request_timeout, 0.1)
    }

    fn matches(&self, status: reqwest::StatusCode, body: &str) -> bool {
        match &self.expect {
            Some(expect) => body.contains(expect.as_str()),
            None => status.is_success(),
        }
    }
}

#[async_trait]
impl Runnable for PollTask {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<Option<String>> {
        let interval = self.interval()?;
        let client = reqwest::Client::builder()
            .user_agent("TaskVault/0.2")
            .timeout(self.request_timeout()?)
            .build()
            .map_err(|e| VaultError::Http(format!("client error: {e}")))?;

        let mut last = String::new();
        for attempt in 1..=self.attempts {
            if ctx.is_cancelled() {
                return Err(ctx.canceled());
            }
            let response = tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(ctx.canceled()),
                r = client.get(&self.url).send() => r,
            };
            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    if self.matches(status, &body) {
                        ctx.emit(
                            Severity::Info,
                            format!("{} answered {status} on attempt {attempt}", self.url),
                        );
                        return Ok(Some(truncate_output(&body, MAX_OUTPUT)));
                    }
                    last = format!("status {status}");
                }
                Err(e) => last = e.to_string(),
            }
            tracing::debug!("🔁 [{}] poll {attempt}/{} of {}: {last}", ctx.name, self.attempts, self.url);
            if attempt < self.attempts {
                ctx.sleep(interval).await?;
            }
        }
        Err(VaultError::Execution(format!(
            "{} not ready after {} attempts ({last})",
            self.url, self.attempts
        )))
    }
}

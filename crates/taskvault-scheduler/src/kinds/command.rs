//! Command kind: run a program (or a shell line) as a subprocess.

use std::collections::BTreeMap;
use std::process::Output;

use async_trait::async_trait;
use serde::Deserialize;

use taskvault_core::{Result, Severity, VaultError};

use crate::runnable::{Runnable, TaskContext};

use super::{MAX_OUTPUT, truncate_output};

#[derive(Debug, Clone, Deserialize)]
pub struct CommandTask {
    /// Program to run, or the full command line when `shell` is set.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Run `command` through `sh -c`.
    #[serde(default)]
    pub shell: bool,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl CommandTask {
    pub const KIND: &'static str = "command";

    pub fn new(command: &str, args: &[&str]) -> Self {
        Self {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            shell: false,
            cwd: None,
            env: BTreeMap::new(),
        }
    }

    pub fn shell(line: &str) -> Self {
        Self {
            shell: true,
            ..Self::new(line, &[])
        }
    }

    pub fn from_payload(payload: &serde_json::Value) -> Result<Self> {
        let task: Self = super::params(Self::KIND, payload)?;
        if task.command.trim().is_empty() {
            return Err(VaultError::InvalidPayload("command: empty command".into()));
        }
        Ok(task)
    }

    fn build(&self) -> tokio::process::Command {
        let mut cmd = if self.shell {
            let mut c = tokio::process::Command::new("sh");
            c.arg("-c").arg(&self.command);
            c
        } else {
            let mut c = tokio::process::Command::new(&self.command);
            c.args(&self.args);
            c
        };
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(shellexpand::tilde(cwd).as_ref());
        }
        cmd.envs(&self.env).kill_on_drop(true);
        cmd
    }
}

/// Turn a finished process into the run result; non-zero exit is an error.
pub(crate) fn process_result(label: &str, output: Output) -> Result<Option<String>> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if output.status.success() {
        return Ok(Some(truncate_output(stdout.trim_end(), MAX_OUTPUT)));
    }
    let code = output
        .status
        .code()
        .map(|c| c.to_string())
        .unwrap_or_else(|| "signal".into());
    let detail = if stderr.trim().is_empty() { stdout } else { stderr };
    Err(VaultError::Execution(format!(
        "{label} exited with {code}: {}",
        truncate_output(detail.trim_end(), MAX_OUTPUT)
    )))
}

/// Wait for the process unless the run is canceled first (dropping the
/// future kills the child).
pub(crate) async fn run_cancellable(
    ctx: &TaskContext,
    label: &str,
    mut cmd: tokio::process::Command,
) -> Result<Output> {
    tokio::select! {
        _ = ctx.cancel.cancelled() => {
            ctx.emit(Severity::Warn, format!("{label} killed on cancel"));
            Err(ctx.canceled())
        }
        out = cmd.output() => out.map_err(|e| VaultError::Execution(format!("failed to spawn {label}: {e}"))),
    }
}

#[async_trait]
impl Runnable for CommandTask {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<Option<String>> {
        tracing::debug!("🖥️ [{}] run #{}: {}", ctx.name, ctx.run, self.command);
        let output = run_cancellable(ctx, &self.command, self.build()).await?;
        process_result(&self.command, output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskvault_core::EventQueue;
    use std::time::Duration;

    fn ctx() -> TaskContext {
        TaskContext::new(1, "cmd", 1, EventQueue::new("cmd", 8))
    }

    #[tokio::test]
    async fn test_echo_output() {
        let task = CommandTask::new("echo", &["hello"]);
        let out = task.execute(&ctx()).await.unwrap();
        assert_eq!(out.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_shell_line_and_env() {
        let mut task = CommandTask::shell("echo $GREETING-$((1+2))");
        task.env.insert("GREETING".into(), "hi".into());
        let out = task.execute(&ctx()).await.unwrap();
        assert_eq!(out.as_deref(), Some("hi-3"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_error() {
        let task = CommandTask::shell("echo boom >&2; exit 3");
        let err = task.execute(&ctx()).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("exited with 3"), "{msg}");
        assert!(msg.contains("boom"), "{msg}");
    }

    #[tokio::test]
    async fn test_missing_program_is_error() {
        let task = CommandTask::new("definitely-not-a-real-binary-xyz", &[]);
        assert!(task.execute(&ctx()).await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_kills_process() {
        let task = CommandTask::new("sleep", &["30"]);
        let ctx = ctx();
        let token = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });
        let started = std::time::Instant::now();
        assert!(task.execute(&ctx).await.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_payload_validation() {
        let ok = CommandTask::from_payload(&serde_json::json!({"command": "ls", "args": ["-l"]}));
        assert_eq!(ok.unwrap().args, vec!["-l".to_string()]);
        assert!(CommandTask::from_payload(&serde_json::json!({"command": "  "})).is_err());
        assert!(CommandTask::from_payload(&serde_json::json!({"args": []})).is_err());
    }
}

//! Script kind: write an inline script to a temp file and run it through an interpreter.

use async_trait::async_trait;
use serde::Deserialize;

use taskvault_core::{Result, VaultError};

use crate::runnable::{Runnable, TaskContext};

use super::command::{process_result, run_cancellable};

struct Interpreter {
    command: &'static str,
    args: &'static [&'static str],
    extension: &'static str,
}

fn interpreter_for(language: &str) -> Option<Interpreter> {
    let (command, args, extension): (&'static str, &'static [&'static str], &'static str) = match language.to_lowercase().as_str() {
        "bash" | "sh" | "shell" => ("bash", &[], "sh"),
        "python" | "py" | "python3" => ("python3", &[], "py"),
        "ruby" | "rb" => ("ruby", &[], "rb"),
        "javascript" | "js" | "node" => ("node", &[], "js"),
        "php" => ("php", &[], "php"),
        "perl" | "pl" => ("perl", &[], "pl"),
        "typescript" | "ts" => ("npx", &["tsx"], "ts"),
        _ => return None,
    };
    Some(Interpreter {
        command,
        args,
        extension,
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptTask {
    #[serde(default = "default_language", alias = "interpreter")]
    pub language: String,
    /// Script body.
    #[serde(alias = "code")]
    pub script: String,
}

fn default_language() -> String {
    "bash".into()
}

impl ScriptTask {
    pub const KIND: &'static str = "script";

    pub fn new(language: &str, script: &str) -> Self {
        Self {
            language: language.to_string(),
            script: script.to_string(),
        }
    }

    pub fn from_payload(payload: &serde_json::Value) -> Result<Self> {
        let task: Self = super::params(Self::KIND, payload)?;
        if interpreter_for(&task.language).is_none() {
            return Err(VaultError::InvalidPayload(format!(
                "script: unsupported language '{}'",
                task.language
            )));
        }
        Ok(task)
    }
}

#[async_trait]
impl Runnable for ScriptTask {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<Option<String>> {
        let interp = interpreter_for(&self.language).ok_or_else(|| {
            VaultError::Execution(format!("unsupported language '{}'", self.language))
        })?;

        let temp_dir = std::env::temp_dir().join("taskvault_scripts");
        tokio::fs::create_dir_all(&temp_dir).await?;
        let file_path = temp_dir.join(format!(
            "script_{}.{}",
            &uuid::Uuid::new_v4().to_string()[..8],
            interp.extension
        ));
        tokio::fs::write(&file_path, &self.script).await?;

        let mut cmd = tokio::process::Command::new(interp.command);
        cmd.args(interp.args).arg(&file_path).kill_on_drop(true);
        let result = run_cancellable(ctx, interp.command, cmd).await;

        let _ = tokio::fs::remove_file(&file_path).await;
        process_result(&format!("{} script", self.language), result?)
    }
}

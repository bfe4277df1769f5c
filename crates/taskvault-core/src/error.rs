//! TaskVault error types.

use thiserror::Error;

/// Errors surfaced synchronously by TaskVault entry points.
///
/// Failures inside a running task never become a `VaultError` at the call
/// site; they end up in the task's history and terminal status instead.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Task kind or name '{0}' is blacklisted")]
    Blacklisted(String),

    #[error("Unknown task type '{0}'")]
    UnknownKind(String),

    #[error("Invalid task payload: {0}")]
    InvalidPayload(String),

    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Component error: {0}")]
    Component(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VaultError {
    /// True for errors caused by a bad submission (the task never entered a queue).
    pub fn is_submission_error(&self) -> bool {
        matches!(
            self,
            Self::Blacklisted(_) | Self::UnknownKind(_) | Self::InvalidPayload(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_errors() {
        assert!(VaultError::Blacklisted("command".into()).is_submission_error());
        assert!(VaultError::UnknownKind("nope".into()).is_submission_error());
        assert!(!VaultError::NotFound("7".into()).is_submission_error());
    }

    #[test]
    fn test_display() {
        let err = VaultError::UnknownKind("teleport".into());
        assert_eq!(err.to_string(), "Unknown task type 'teleport'");
    }
}

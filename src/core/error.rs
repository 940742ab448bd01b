//! Error types for agent-verify.
//!
//! This module defines all errors that can occur while validating a worktree
//! and driving the AI-assisted remediation loop.

use std::path::PathBuf;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// All possible errors in agent-verify.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Configuration errors
    // =========================================================================
    /// Configuration file not found.
    #[error("Configuration file not found: {path}")]
    ConfigNotFound {
        /// Path where config was expected.
        path: PathBuf,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse configuration: {message}")]
    ConfigParse {
        /// Description of the parse error.
        message: String,
        /// Optional source error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Invalid configuration value.
    #[error("Invalid configuration: {field} - {message}")]
    ConfigInvalid {
        /// Field name that is invalid.
        field: String,
        /// Description of why it's invalid.
        message: String,
    },

    // =========================================================================
    // Command execution errors
    // =========================================================================
    /// A command exceeded its deadline.
    #[error("Command '{command}' timed out after {timeout}")]
    CommandTimeout {
        /// The command that timed out.
        command: String,
        /// Timeout duration as string.
        timeout: String,
    },

    /// A command exited non-zero or could not be run.
    #[error("{step} command '{command}' failed: {message}")]
    CommandFailed {
        /// Pipeline step the command belongs to.
        step: String,
        /// The command text.
        command: String,
        /// Error message or output summary.
        message: String,
        /// Exit code if available.
        exit_code: Option<i32>,
    },

    /// The caller's cancellation signal fired.
    #[error("Operation cancelled")]
    Cancelled,

    // =========================================================================
    // Retry errors
    // =========================================================================
    /// Re-validation after an AI fix still failed.
    #[error("Validation failed at {step} step (attempt {attempt})")]
    ValidationFailed {
        /// Step that failed.
        step: String,
        /// Attempt number that produced the failure.
        attempt: u32,
    },

    /// AI-assisted retry is turned off.
    #[error("AI retry is disabled")]
    RetryDisabled,

    /// The attempt budget is spent.
    #[error("Maximum retries exceeded: attempt {attempt} of {max}")]
    MaxRetriesExceeded {
        /// Requested attempt.
        attempt: u32,
        /// Configured maximum.
        max: u32,
    },

    /// The worktree vanished before the AI agent was invoked.
    #[error("Worktree not found: {path}")]
    WorktreeNotFound {
        /// Path that was expected to exist.
        path: PathBuf,
    },

    /// The AI agent invocation failed.
    #[error("AI agent '{agent}' failed")]
    AiInvocation {
        /// Agent name.
        agent: String,
        /// Underlying failure.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// No runner is known for the requested agent.
    #[error("Unknown AI agent: {agent}")]
    UnknownAgent {
        /// Agent name.
        agent: String,
    },

    // =========================================================================
    // Git errors
    // =========================================================================
    /// Git operation failed.
    #[error("Git operation failed: {operation} - {message}")]
    GitOperation {
        /// Name of the operation that failed.
        operation: String,
        /// Error message.
        message: String,
    },

    /// The index lock stayed held for every attempt.
    #[error("git {operation}: lock retry exhausted after {attempts} attempts: {message}")]
    LockRetryExhausted {
        /// Git operation being retried.
        operation: String,
        /// Number of attempts made.
        attempts: u32,
        /// Last failure text.
        message: String,
    },

    /// No modified file could be staged.
    #[error("Failed to stage {} file(s): {message}", .failed.len())]
    StagingFailed {
        /// Files that could not be staged.
        failed: Vec<String>,
        /// Summary of the last failure.
        message: String,
    },

    // =========================================================================
    // I/O errors
    // =========================================================================
    /// File I/O error.
    #[error("I/O error: {message}")]
    Io {
        /// Description of what failed.
        message: String,
        /// Source error.
        #[source]
        source: std::io::Error,
    },

    // =========================================================================
    // Internal errors
    // =========================================================================
    /// Internal error (should never happen).
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl Error {
    /// Creates a new configuration parse error.
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new configuration parse error with source.
    pub fn config_parse_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new I/O error with context.
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Creates a new Git operation error.
    pub fn git(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::GitOperation {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates a new command failed error.
    pub fn command_failed(
        step: impl Into<String>,
        command: impl Into<String>,
        message: impl Into<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::CommandFailed {
            step: step.into(),
            command: command.into(),
            message: message.into(),
            exit_code,
        }
    }

    /// Wraps an AI collaborator failure.
    pub fn ai_invocation(
        agent: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::AiInvocation {
            agent: agent.into(),
            source: Box::new(source),
        }
    }

    /// Returns true for cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns true if another AI attempt could still fix this.
    ///
    /// Disabled retry, an exhausted budget and a missing worktree are
    /// terminal; callers present them differently from a failed attempt.
    #[must_use]
    pub const fn is_retryable_with_ai(&self) -> bool {
        matches!(
            self,
            Self::ValidationFailed { .. } | Self::CommandFailed { .. } | Self::CommandTimeout { .. }
        )
    }

    /// Returns true if this is a user-correctable error.
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound { .. }
                | Self::ConfigInvalid { .. }
                | Self::UnknownAgent { .. }
                | Self::WorktreeNotFound { .. }
        )
    }

    /// Returns an exit code appropriate for this error.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::CommandFailed { exit_code, .. } => exit_code.unwrap_or(1),
            Self::CommandTimeout { .. } => 124, // Standard timeout exit code
            Self::Cancelled => 130,
            Self::ConfigNotFound { .. } | Self::ConfigParse { .. } | Self::ConfigInvalid { .. } => {
                78
            }, // EX_CONFIG
            Self::GitOperation { .. }
            | Self::LockRetryExhausted { .. }
            | Self::StagingFailed { .. } => 65, // EX_DATAERR
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Display / Error message tests
    // =========================================================================

    #[test]
    fn test_display_config_not_found() {
        let err = Error::ConfigNotFound {
            path: PathBuf::from("/my/agent-verify.toml"),
        };
        assert_eq!(
            err.to_string(),
            "Configuration file not found: /my/agent-verify.toml"
        );
    }

    #[test]
    fn test_display_config_invalid() {
        let err = Error::ConfigInvalid {
            field: "pipeline.timeout".to_string(),
            message: "Invalid duration".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid configuration: pipeline.timeout - Invalid duration"
        );
    }

    #[test]
    fn test_display_command_timeout() {
        let err = Error::CommandTimeout {
            command: "cargo test".to_string(),
            timeout: "5m".to_string(),
        };
        assert_eq!(err.to_string(), "Command 'cargo test' timed out after 5m");
    }

    #[test]
    fn test_display_command_failed_carries_step() {
        let err = Error::command_failed("lint", "cargo clippy", "exit code 101", Some(101));
        assert_eq!(
            err.to_string(),
            "lint command 'cargo clippy' failed: exit code 101"
        );
    }

    #[test]
    fn test_display_validation_failed() {
        let err = Error::ValidationFailed {
            step: "test".to_string(),
            attempt: 2,
        };
        assert_eq!(err.to_string(), "Validation failed at test step (attempt 2)");
    }

    #[test]
    fn test_display_max_retries_exceeded() {
        let err = Error::MaxRetriesExceeded { attempt: 4, max: 3 };
        assert_eq!(err.to_string(), "Maximum retries exceeded: attempt 4 of 3");
    }

    #[test]
    fn test_display_lock_retry_exhausted() {
        let err = Error::LockRetryExhausted {
            operation: "add".to_string(),
            attempts: 5,
            message: "index.lock exists".to_string(),
        };
        assert!(err.to_string().contains("lock retry exhausted"));
    }

    #[test]
    fn test_display_staging_failed_counts_files() {
        let err = Error::StagingFailed {
            failed: vec!["a.rs".to_string(), "b.rs".to_string()],
            message: "permission denied".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to stage 2 file(s): permission denied"
        );
    }

    #[test]
    fn test_display_retry_disabled() {
        assert_eq!(Error::RetryDisabled.to_string(), "AI retry is disabled");
    }

    #[test]
    fn test_display_worktree_not_found() {
        let err = Error::WorktreeNotFound {
            path: PathBuf::from("/tmp/gone"),
        };
        assert_eq!(err.to_string(), "Worktree not found: /tmp/gone");
    }

    // =========================================================================
    // Constructor tests
    // =========================================================================

    #[test]
    fn test_config_parse_with_source() {
        let toml_err = toml::from_str::<toml::Value>("invalid [[[toml").expect_err("should fail");
        let err = Error::config_parse_with_source("bad toml", toml_err);
        assert!(matches!(&err, Error::ConfigParse { message, source }
            if message == "bad toml" && source.is_some()
        ));
    }

    #[test]
    fn test_ai_invocation_keeps_source() {
        use std::error::Error as StdError;
        let err = Error::ai_invocation("claude", std::io::Error::other("spawn failed"));
        assert_eq!(err.to_string(), "AI agent 'claude' failed");
        assert!(err.source().is_some());
    }

    // =========================================================================
    // Classification tests
    // =========================================================================

    #[test]
    fn test_retry_disabled_and_exhausted_are_distinct_and_terminal() {
        let disabled = Error::RetryDisabled;
        let exhausted = Error::MaxRetriesExceeded { attempt: 4, max: 3 };
        assert!(!disabled.is_retryable_with_ai());
        assert!(!exhausted.is_retryable_with_ai());
        assert!(!matches!(disabled, Error::MaxRetriesExceeded { .. }));
    }

    #[test]
    fn test_validation_failed_is_retryable() {
        let err = Error::ValidationFailed {
            step: "lint".to_string(),
            attempt: 1,
        };
        assert!(err.is_retryable_with_ai());
    }

    #[test]
    fn test_is_cancelled() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::RetryDisabled.is_cancelled());
    }

    // =========================================================================
    // Exit code tests
    // =========================================================================

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::command_failed("t", "c", "m", Some(42)).exit_code(), 42);
        assert_eq!(Error::command_failed("t", "c", "m", None).exit_code(), 1);
        assert_eq!(
            Error::CommandTimeout {
                command: "c".into(),
                timeout: "1s".into(),
            }
            .exit_code(),
            124
        );
        assert_eq!(Error::config_parse("x").exit_code(), 78);
        assert_eq!(Error::git("add", "boom").exit_code(), 65);
        assert_eq!(Error::Cancelled.exit_code(), 130);
        assert_eq!(Error::RetryDisabled.exit_code(), 1);
    }

    #[test]
    fn test_is_user_error() {
        assert!(Error::UnknownAgent {
            agent: "x".into()
        }
        .is_user_error());
        assert!(!Error::git("op", "msg").is_user_error());
    }
}

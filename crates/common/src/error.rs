//! Error types for imagetest

use std::time::Duration;

use thiserror::Error;

use crate::types::ResourceKind;

/// Result type alias using imagetest Error
pub type Result<T> = std::result::Result<T, Error>;

/// imagetest error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to launch {program}: {reason}")]
    LaunchFailed { program: String, reason: String },

    #[error("Command `{command}` did not finish within {timeout:?}")]
    TimeoutExceeded { command: String, timeout: Duration },

    #[error("Cannot extract {kind} state: {reason}")]
    Extraction { kind: ResourceKind, reason: String },

    #[error("Timed out after {elapsed:?} waiting for {what} (last state: {last_state})")]
    PollTimedOut {
        what: String,
        elapsed: Duration,
        last_state: String,
    },

    #[error("{what} can no longer succeed: {reason}")]
    TerminalState { what: String, reason: String },

    #[error("Command `{command}` failed with exit code {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Expected {what} to fail, but it succeeded")]
    UnexpectedSuccess { what: String },

    #[error("Cleanup left {} resource(s) behind: {}", failures.len(), failures.join("; "))]
    Cleanup { failures: Vec<String> },

    #[error("Resource not found: {kind} {id}")]
    NotFound { kind: ResourceKind, id: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config write error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),
}

impl Error {
    /// Shorthand for an extraction failure
    pub fn extraction(kind: ResourceKind, reason: impl Into<String>) -> Self {
        Error::Extraction {
            kind,
            reason: reason.into(),
        }
    }

    /// Whether a polling loop may retry after this error.
    ///
    /// Extraction errors are retryable here; the poller bounds how many
    /// of them may occur back to back.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::TimeoutExceeded { .. } | Error::CommandFailed { .. } | Error::Extraction { .. }
        )
    }

    pub fn is_extraction(&self) -> bool {
        matches!(self, Error::Extraction { .. })
    }
}

//! Error types for the Backup Claim Operator

use thiserror::Error;

/// Result type alias using the operator's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Operator error types
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Object store call failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Source object has no version in the bucket
    #[error("Source not found: {0}")]
    SourceNotFound(String),

    /// Existing destination pod could not be found
    #[error("Destination not found: {0}")]
    DestinationNotFound(String),

    /// Remote execution channel failed before the command completed
    #[error("Remote exec error: {0}")]
    Exec(String),

    /// Remote command ran but reported a failure
    #[error("Command '{step}' failed with exit code {exit_code}: {stderr}")]
    Command {
        step: String,
        exit_code: i32,
        stderr: String,
    },

    /// Streaming copy into the destination failed
    #[error("Transfer error: {0}")]
    Transfer(String),

    /// Reconciliation was cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }

    /// Create a remote exec error
    pub fn exec(msg: impl Into<String>) -> Self {
        Error::Exec(msg.into())
    }

    /// Create a transfer error
    pub fn transfer(msg: impl Into<String>) -> Self {
        Error::Transfer(msg.into())
    }

    /// Create a failed command error
    pub fn command(step: impl Into<String>, exit_code: i32, stderr: impl Into<String>) -> Self {
        Error::Command {
            step: step.into(),
            exit_code,
            stderr: stderr.into(),
        }
    }

    /// Whether the error came from a post-processing command that ran and failed
    pub fn is_command_failure(&self) -> bool {
        matches!(self, Error::Command { .. })
    }
}

use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LoafErr>;

/// Error kinds surfaced by the core runtime. Tool handlers convert these
/// into structured `{ok:false}` results; the RPC layer maps them onto
/// JSON-RPC error codes.
#[derive(Debug, Error)]
pub enum LoafErr {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A foreground command exceeded its time budget.
    #[error("command timed out")]
    Timeout,

    /// The caller's cancellation signal fired.
    #[error("operation aborted")]
    Aborted,

    #[error("child process failed with exit code {exit_code}")]
    ChildFailure { exit_code: i32 },

    /// No runnable shell could be resolved on this host.
    #[error("no usable shell found")]
    EnvUnavailable,

    #[error("storage error while writing {path}: {source}")]
    Storage {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl LoafErr {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        LoafErr::InvalidInput(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        LoafErr::NotFound(message.into())
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        LoafErr::Unsupported(message.into())
    }

    /// Machine-readable status tag used in structured tool failures.
    pub fn status(&self) -> &'static str {
        match self {
            LoafErr::InvalidInput(_) => "invalid_input",
            LoafErr::NotFound(_) => "not_found",
            LoafErr::Unsupported(_) => "unsupported",
            LoafErr::Timeout => "timeout",
            LoafErr::Aborted => "aborted",
            LoafErr::ChildFailure { .. } => "child_failure",
            LoafErr::EnvUnavailable => "env_unavailable",
            LoafErr::Storage { .. } => "storage_error",
            LoafErr::Io(_) => "io_error",
        }
    }
}

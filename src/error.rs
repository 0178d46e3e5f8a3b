//! Error types for request resolution and execution.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to the caller of `/execute`.
#[derive(Error, Debug)]
pub enum Error {
    /// No inline script, registry script or handler could be resolved.
    #[error("{0}")]
    NotFound(String),

    /// The request itself is malformed (e.g. empty `request_id`).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The resolved code faulted during evaluation or result extraction.
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// The script registry exists but could not be read.
    #[error("Failed to read script for language title '{title}': {source}")]
    Registry {
        title: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Create a new not-found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new invalid request error.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// HTTP status code for this error.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::InvalidRequest(_) => 400,
            Self::Execution(_) | Self::Registry { .. } => 500,
        }
    }

    /// Diagnostic trace for logs and audit records.
    pub fn trace(&self) -> Option<&str> {
        match self {
            Self::Execution(e) => Some(&e.trace),
            _ => None,
        }
    }
}

/// A fault raised by executed code.
///
/// `message` is what the caller sees; `trace` is the full diagnostic
/// (nested call frames with positions) that only goes to logs and audit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ExecutionError {
    pub message: String,
    pub trace: String,
}

impl ExecutionError {
    /// Error whose trace is just the message (native handlers, task panics).
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            trace: message.clone(),
            message,
        }
    }

    /// Error with a separate diagnostic trace.
    pub fn with_trace(message: impl Into<String>, trace: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: trace.into(),
        }
    }
}

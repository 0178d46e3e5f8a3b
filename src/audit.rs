//! Best-effort audit trail of executions.
//!
//! The request path only ever calls [`AuditDispatcher::emit`], which queues
//! the event and returns immediately. A background worker drains the queue
//! into an [`AuditSink`]; sink failures are logged and dropped.

mod postgres;

pub use postgres::PostgresAuditSink;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default capacity of the audit queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Errors raised by an audit sink. Never surfaced to callers.
#[derive(Error, Debug)]
pub enum AuditSinkError {
    #[error("audit database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("failed to encode audit payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

/// Classification of an error record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ScriptNotFound,
    ScriptExecutionError,
    HandlerExecutionError,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ScriptNotFound => "SCRIPT_NOT_FOUND",
            Self::ScriptExecutionError => "SCRIPT_EXECUTION_ERROR",
            Self::HandlerExecutionError => "HANDLER_EXECUTION_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A successful execution.
#[derive(Debug, Clone, Serialize)]
pub struct SuccessRecord {
    pub request_id: String,
    pub language_title: String,
    pub params: Value,
    pub result: Value,
    pub status_code: u16,
    pub duration_ms: u64,
    pub memory_usage_bytes: Option<u64>,
}

/// A failed execution or resolution.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub request_id: String,
    pub error_code: ErrorCode,
    pub error_message: String,
    pub stack_trace: Option<String>,
    pub context: Value,
}

#[derive(Debug, Clone)]
pub enum AuditEvent {
    Success(SuccessRecord),
    Error(ErrorRecord),
}

impl AuditEvent {
    fn request_id(&self) -> &str {
        match self {
            Self::Success(r) => &r.request_id,
            Self::Error(r) => &r.request_id,
        }
    }
}

/// Persistence backend for audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record_success(&self, record: &SuccessRecord) -> Result<(), AuditSinkError>;

    async fn record_error(&self, record: &ErrorRecord) -> Result<(), AuditSinkError>;
}

/// Fire-and-forget handle to the audit worker.
#[derive(Debug, Clone, Default)]
pub struct AuditDispatcher {
    tx: Option<mpsc::Sender<AuditEvent>>,
}

impl AuditDispatcher {
    /// A dispatcher that discards every event.
    pub const fn disabled() -> Self {
        Self { tx: None }
    }

    /// Start a worker draining into `sink`.
    ///
    /// The worker stops once every dispatcher clone has been dropped.
    pub fn spawn(sink: Arc<dyn AuditSink>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<AuditEvent>(capacity.max(1));

        let worker = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let outcome = match &event {
                    AuditEvent::Success(record) => sink.record_success(record).await,
                    AuditEvent::Error(record) => sink.record_error(record).await,
                };
                match outcome {
                    Ok(()) => debug!(request_id = %event.request_id(), "Audit record written"),
                    Err(e) => warn!(
                        request_id = %event.request_id(),
                        error = %e,
                        "Failed to write audit record"
                    ),
                }
            }
            debug!("Audit worker stopped");
        });

        (Self { tx: Some(tx) }, worker)
    }

    pub const fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue an event without waiting. Drops it if the queue is full.
    pub fn emit(&self, event: AuditEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(request_id = %event.request_id(), "Audit queue full, dropping record");
            }
            Err(TrySendError::Closed(event)) => {
                warn!(request_id = %event.request_id(), "Audit worker gone, dropping record");
            }
        }
    }
}

/// Wait for `worker` to write out whatever is still queued.
///
/// The worker only finishes once every dispatcher has been dropped. Gives up
/// after `grace` and returns `false`.
pub async fn flush(worker: JoinHandle<()>, grace: Duration) -> bool {
    match tokio::time::timeout(grace, worker).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(error = %e, "Audit worker terminated abnormally");
            false
        }
        Err(_) => {
            warn!(?grace, "Timed out flushing audit records");
            false
        }
    }
}

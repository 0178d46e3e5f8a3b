//! The `/execute` operation, independent of HTTP.

use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::audit::{AuditDispatcher, AuditEvent, ErrorCode, ErrorRecord, SuccessRecord};
use crate::engine::ExecutionEngine;
use crate::error::{Error, Result};
use crate::model::{Execution, ExecutionRequest};
use crate::resolver::{CodeResolver, ResolvedUnit};

/// Resolves, executes and audits requests.
pub struct RuntimeService {
    resolver: CodeResolver,
    engine: ExecutionEngine,
    audit: AuditDispatcher,
    audit_not_found: bool,
}

impl RuntimeService {
    /// Create a service. Audit events go to `audit`; `SCRIPT_NOT_FOUND`
    /// records are only emitted when `audit_not_found` is set.
    pub fn new(
        resolver: CodeResolver,
        engine: ExecutionEngine,
        audit: AuditDispatcher,
        audit_not_found: bool,
    ) -> Self {
        Self {
            resolver,
            engine,
            audit,
            audit_not_found,
        }
    }

    /// Execute one request.
    #[instrument(skip_all, fields(request_id = %request.request_id))]
    pub async fn execute(&self, request: ExecutionRequest) -> Result<Execution> {
        if request.request_id.trim().is_empty() {
            warn!("Rejected request with empty request_id");
            return Err(Error::invalid_request("request_id must not be empty"));
        }

        info!("Executing request {}", request.request_id);

        let unit = match self.resolver.resolve(&request).await {
            Ok(unit) => unit,
            Err(e) => {
                self.report_resolve_failure(&request, &e);
                return Err(e);
            }
        };

        let (outcome, error_code) = match unit {
            ResolvedUnit::Script { origin, body } => {
                debug!(?origin, "Running script");
                (
                    self.engine.run_script(&request, body).await,
                    ErrorCode::ScriptExecutionError,
                )
            }
            ResolvedUnit::Handler(handler) => {
                debug!("Delegating to handler");
                (
                    self.engine.run_handler(handler.as_ref(), &request).await,
                    ErrorCode::HandlerExecutionError,
                )
            }
        };

        match outcome {
            Ok(execution) => {
                info!(
                    execution_time_ms = execution.result.execution_time_ms,
                    "Request {} executed successfully in {}ms",
                    request.request_id,
                    execution.result.execution_time_ms
                );
                self.audit.emit(AuditEvent::Success(SuccessRecord {
                    request_id: request.request_id.clone(),
                    language_title: request.language_title().to_string(),
                    params: request.params_value(),
                    result: execution.result.result.clone(),
                    status_code: 200,
                    duration_ms: execution.result.execution_time_ms,
                    memory_usage_bytes: execution.result.memory_usage_bytes,
                }));
                Ok(execution)
            }
            Err(e) => {
                error!(
                    error = %e.message,
                    "Error executing request {}:\n{}",
                    request.request_id,
                    e.trace
                );
                self.audit.emit(AuditEvent::Error(ErrorRecord {
                    request_id: request.request_id.clone(),
                    error_code,
                    error_message: e.message.clone(),
                    stack_trace: Some(e.trace.clone()),
                    context: audit_context(&request),
                }));
                Err(e.into())
            }
        }
    }

    fn report_resolve_failure(&self, request: &ExecutionRequest, err: &Error) {
        error!(error = %err, "Failed to resolve code for request {}", request.request_id);

        if matches!(err, Error::NotFound(_)) && self.audit_not_found {
            self.audit.emit(AuditEvent::Error(ErrorRecord {
                request_id: request.request_id.clone(),
                error_code: ErrorCode::ScriptNotFound,
                error_message: err.to_string(),
                stack_trace: None,
                context: audit_context(request),
            }));
        }
    }
}

fn audit_context(request: &ExecutionRequest) -> serde_json::Value {
    json!({
        "language_title": request.language_title(),
        "params": request.params_value(),
        "context": request.context_value(),
    })
}

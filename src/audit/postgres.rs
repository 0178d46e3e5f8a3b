//! PostgreSQL audit sink.
//!
//! Writes to `public.request_logs` and `public.error_logs`. A connection is
//! opened per record; the audit worker is the only caller, so writes are
//! sequential and never on the request path.

use async_trait::async_trait;
use serde_json::json;
use tokio_postgres::{Client, NoTls};
use tracing::{instrument, warn};

use super::{AuditSink, AuditSinkError, ErrorRecord, SuccessRecord};

const INSERT_REQUEST_LOG: &str = "INSERT INTO public.request_logs \
     (request_id, language_title, request_payload, response_payload, status_code, duration_ms, runtime_metrics) \
     VALUES ($1, $2, $3, $4, $5, $6, $7)";

const INSERT_ERROR_LOG: &str = "INSERT INTO public.error_logs \
     (request_log_id, error_code, error_message, stack_trace, context) \
     VALUES ($1, $2, $3, $4, $5)";

/// Audit sink backed by `tokio-postgres`.
#[derive(Clone)]
pub struct PostgresAuditSink {
    database_url: String,
}

impl std::fmt::Debug for PostgresAuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The URL usually embeds credentials
        f.debug_struct("PostgresAuditSink").finish_non_exhaustive()
    }
}

impl PostgresAuditSink {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }

    async fn connect(&self) -> Result<Client, AuditSinkError> {
        let (client, connection) = tokio_postgres::connect(&self.database_url, NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "Audit database connection error");
            }
        });
        Ok(client)
    }
}

fn saturating_i32(value: u64) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[async_trait]
impl AuditSink for PostgresAuditSink {
    #[instrument(skip_all, fields(request_id = %record.request_id))]
    async fn record_success(&self, record: &SuccessRecord) -> Result<(), AuditSinkError> {
        let request_payload = serde_json::to_string(&record.params)?;
        let response_payload = serde_json::to_string(&record.result)?;
        let runtime_metrics =
            serde_json::to_string(&json!({ "memory_usage_bytes": record.memory_usage_bytes }))?;
        let status_code = i32::from(record.status_code);
        let duration_ms = saturating_i32(record.duration_ms);

        let client = self.connect().await?;
        client
            .execute(
                INSERT_REQUEST_LOG,
                &[
                    &record.request_id,
                    &record.language_title,
                    &request_payload,
                    &response_payload,
                    &status_code,
                    &duration_ms,
                    &runtime_metrics,
                ],
            )
            .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(request_id = %record.request_id, error_code = %record.error_code))]
    async fn record_error(&self, record: &ErrorRecord) -> Result<(), AuditSinkError> {
        let context = serde_json::to_string(&record.context)?;

        let client = self.connect().await?;
        client
            .execute(
                INSERT_ERROR_LOG,
                &[
                    &record.request_id,
                    &record.error_code.as_str(),
                    &record.error_message,
                    &record.stack_trace,
                    &context,
                ],
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::ErrorCode;

    #[test]
    fn debug_hides_database_url() {
        let sink = PostgresAuditSink::new("postgres://user:hunter2@db/audit");
        assert!(!format!("{sink:?}").contains("hunter2"));
    }

    #[test]
    fn durations_saturate() {
        assert_eq!(saturating_i32(12), 12);
        assert_eq!(saturating_i32(u64::MAX), i32::MAX);
    }

    #[tokio::test]
    async fn unreachable_database_is_an_error() {
        // Port 1 on localhost refuses connections
        let sink = PostgresAuditSink::new("host=127.0.0.1 port=1 user=audit connect_timeout=1");
        let record = ErrorRecord {
            request_id: "r1".into(),
            error_code: ErrorCode::ScriptNotFound,
            error_message: "missing".into(),
            stack_trace: None,
            context: serde_json::json!({}),
        };
        assert!(matches!(
            sink.record_error(&record).await,
            Err(AuditSinkError::Database(_))
        ));
    }
}

//! HTTP wire types.
//!
//! `POST /execute` takes an [`ExecutionRequest`](crate::model::ExecutionRequest)
//! and answers with an [`ExecutionResult`](crate::model::ExecutionResult) or
//! one of the error bodies below.

use serde::{Deserialize, Serialize};

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub runtime: String,
    pub version: String,
}

impl HealthResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            runtime: "rhai".into(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

/// Body of 404 and 400 responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailResponse {
    pub detail: String,
    pub execution_time_ms: u64,
}

/// Body of 500 responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureResponse {
    pub detail: FailureDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureDetail {
    pub error: String,
    pub execution_time_ms: u64,
}

//! HTTP transport.
//!
//! Exposes `GET /health`, `GET /api/v1/health` and `POST /execute` over axum,
//! with permissive CORS and per-request tracing.

pub mod protocol;

pub use protocol::{DetailResponse, FailureDetail, FailureResponse, HealthResponse};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::engine::metrics::elapsed_ms;
use crate::error::Error;
use crate::model::{ExecutionRequest, ExecutionResult};
use crate::service::RuntimeService;

/// A service error paired with the time spent before it occurred.
#[derive(Debug)]
pub struct ApiError {
    error: Error,
    execution_time_ms: u64,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.error.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            let body = FailureResponse {
                detail: FailureDetail {
                    error: self.error.to_string(),
                    execution_time_ms: self.execution_time_ms,
                },
            };
            (status, Json(body)).into_response()
        } else {
            let body = DetailResponse {
                detail: self.error.to_string(),
                execution_time_ms: self.execution_time_ms,
            };
            (status, Json(body)).into_response()
        }
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::ok())
}

async fn execute(
    State(service): State<Arc<RuntimeService>>,
    Json(request): Json<ExecutionRequest>,
) -> Result<Json<ExecutionResult>, ApiError> {
    let start = Instant::now();
    match service.execute(request).await {
        Ok(execution) => Ok(Json(execution.result)),
        Err(error) => Err(ApiError {
            error,
            execution_time_ms: elapsed_ms(start),
        }),
    }
}

/// Build the application router.
pub fn router(service: Arc<RuntimeService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/health", get(health))
        .route("/execute", post(execute))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(service)
}

/// Serve until Ctrl+C or SIGTERM.
pub async fn serve(service: Arc<RuntimeService>, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!(%addr, "Starting script runtime");

    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Script runtime shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}

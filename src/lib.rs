//! script-runtime library
//!
//! This crate provides the core functionality for the script runtime:
//! - Code resolution (inline script, registry script, handler)
//! - Per-request Rhai evaluation with captured output and metrics
//! - Best-effort audit persistence
//! - The HTTP transport exposing `/health` and `/execute`

pub mod audit;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod resolver;
pub mod service;
pub mod transport;

pub use error::{Error, ExecutionError, Result};
pub use model::{ExecutionRequest, ExecutionResult};

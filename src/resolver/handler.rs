//! Handlers resolved by convention.
//!
//! A handler receives `params` and `context` and returns the result
//! directly; it does not go through the per-request namespace. The request
//! id is passed along for log tagging only. Native
//! handlers implement [`Handler`]; the binary also discovers a script handler
//! at `<function_dir>/handler.rhai` defining `fn handle(params, context)`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rhai::{Dynamic, Scope, AST};
use serde_json::Value;
use tracing::{debug, info, instrument, warn, Span};

use crate::engine::log_output;
use crate::engine::namespace::{
    build_engine, defines_handle, eval_error, to_dynamic, to_json, OutputBuffers, HANDLE_FN,
};
use crate::error::ExecutionError;

/// File name looked up in the function directory.
pub const HANDLER_FILE: &str = "handler.rhai";

/// A pre-registered routine that handles a whole request.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(
        &self,
        request_id: &str,
        params: &Value,
        context: &Value,
    ) -> Result<Value, ExecutionError>;
}

/// Handler backed by a compiled `handler.rhai`.
#[derive(Debug, Clone)]
pub struct ScriptHandler {
    path: PathBuf,
    ast: Arc<AST>,
}

impl ScriptHandler {
    /// Look for `handler.rhai` in `dir`.
    ///
    /// Returns `Ok(None)` when the file is absent or defines no `handle`
    /// function. A file that fails to compile is an error.
    pub fn discover(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(HANDLER_FILE);
        if !path.is_file() {
            debug!(path = %path.display(), "No handler module");
            return Ok(None);
        }

        let engine = build_engine(&OutputBuffers::default());
        let ast = engine
            .compile_file(path.clone())
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("Failed to compile handler {}", path.display()))?;

        if !defines_handle(&ast) {
            warn!(path = %path.display(), "Handler module defines no `handle` function, ignoring");
            return Ok(None);
        }

        info!(path = %path.display(), "Discovered handler module");
        Ok(Some(Self {
            path,
            ast: Arc::new(ast),
        }))
    }

    fn call(&self, request_id: &str, params: &Value, context: &Value) -> Result<Value, ExecutionError> {
        let buffers = OutputBuffers::default();
        let engine = build_engine(&buffers);
        let args = (to_dynamic(params)?, to_dynamic(context)?);

        let outcome = engine.call_fn::<Dynamic>(&mut Scope::new(), &self.ast, HANDLE_FN, args);

        log_output(request_id, &buffers.take());

        to_json(&outcome.map_err(|e| eval_error(&e))?)
    }
}

#[async_trait]
impl Handler for ScriptHandler {
    #[instrument(skip_all, fields(handler = %self.path.display()))]
    async fn handle(
        &self,
        request_id: &str,
        params: &Value,
        context: &Value,
    ) -> Result<Value, ExecutionError> {
        let handler = self.clone();
        let request_id = request_id.to_string();
        let params = params.clone();
        let context = context.clone();
        let span = Span::current();

        tokio::task::spawn_blocking(move || {
            span.in_scope(|| handler.call(&request_id, &params, &context))
        })
            .await
            .map_err(|e| ExecutionError::new(format!("Handler task failed: {e}")))?
    }
}

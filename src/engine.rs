//! Execution engine.
//!
//! Runs a resolved script body in a fresh namespace on the blocking pool,
//! or delegates to a resolved handler, and measures both the same way.

pub mod metrics;
pub mod namespace;

pub use namespace::{Namespace, ScriptLogger};

use tracing::{debug, info, instrument, warn, Span};
use uuid::Uuid;

use crate::error::ExecutionError;
use crate::model::{CapturedOutput, Execution, ExecutionRequest, ExecutionResult};
use crate::resolver::Handler;
use metrics::Measurement;

/// Stateless executor shared by all requests.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionEngine {
    measure_memory: bool,
}

impl ExecutionEngine {
    /// Create an engine. `measure_memory` toggles the resident-memory delta.
    pub const fn new(measure_memory: bool) -> Self {
        Self { measure_memory }
    }

    /// Evaluate `body` for `request` on the blocking thread pool.
    #[instrument(
        skip_all,
        fields(request_id = %request.request_id, execution_id = %Uuid::new_v4())
    )]
    pub async fn run_script(
        &self,
        request: &ExecutionRequest,
        body: String,
    ) -> Result<Execution, ExecutionError> {
        let engine = *self;
        let request = request.clone();
        let span = Span::current();

        tokio::task::spawn_blocking(move || span.in_scope(|| engine.evaluate(&request, &body)))
            .await
            .map_err(|e| ExecutionError::new(format!("Execution task failed: {e}")))?
    }

    /// Evaluate `body` on the current thread.
    pub fn evaluate(&self, request: &ExecutionRequest, body: &str) -> Result<Execution, ExecutionError> {
        debug!(code_len = body.len(), "Evaluating script");

        let measurement = Measurement::begin(self.measure_memory);
        let mut namespace = Namespace::new(request)?;
        let outcome = namespace.evaluate(body);
        let (execution_time_ms, memory_usage_bytes) = measurement.finish();

        let output = namespace.take_output();
        log_output(&request.request_id, &output);

        let result = outcome?;
        debug!(execution_time_ms, ?memory_usage_bytes, "Script evaluated");

        Ok(Execution {
            result: ExecutionResult {
                result,
                execution_time_ms,
                memory_usage_bytes,
            },
            output,
        })
    }

    /// Delegate the whole request to a handler, bypassing the namespace.
    #[instrument(skip_all, fields(request_id = %request.request_id))]
    pub async fn run_handler(
        &self,
        handler: &dyn Handler,
        request: &ExecutionRequest,
    ) -> Result<Execution, ExecutionError> {
        let measurement = Measurement::begin(self.measure_memory);
        let result = handler
            .handle(
                &request.request_id,
                &request.params_value(),
                &request.context_value(),
            )
            .await?;
        let (execution_time_ms, memory_usage_bytes) = measurement.finish();

        Ok(Execution {
            result: ExecutionResult {
                result,
                execution_time_ms,
                memory_usage_bytes,
            },
            output: CapturedOutput::default(),
        })
    }
}

/// Emit captured output to the structured log.
pub(crate) fn log_output(request_id: &str, output: &CapturedOutput) {
    let stdout = output.stdout.trim_end();
    if !stdout.is_empty() {
        info!(request_id = %request_id, "STDOUT: {stdout}");
    }
    let stderr = output.stderr.trim_end();
    if !stderr.is_empty() {
        warn!(request_id = %request_id, "STDERR: {stderr}");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Run `f` under a plain-text fmt subscriber and return what it logged.
    pub(crate) fn capture_logs(f: impl FnOnce()) -> String {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = logs.0.lock().unwrap().clone();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    #[test]
    fn evaluate_inline_arithmetic() {
        let engine = ExecutionEngine::new(false);
        let request = ExecutionRequest::new("r1").with_param("x", 1);
        let execution = engine.evaluate(&request, r#"result = params["x"] + 1"#).unwrap();
        assert_eq!(execution.result.result, json!(2));
        assert!(execution.result.memory_usage_bytes.is_none());
    }

    #[test]
    fn execution_time_covers_sleep() {
        let engine = ExecutionEngine::new(false);
        let request = ExecutionRequest::new("slow");
        let execution = engine.evaluate(&request, "sleep(50); result = 1;").unwrap();
        assert!(execution.result.execution_time_ms >= 50);
    }

    #[test]
    fn memory_is_reported_when_enabled() {
        if metrics::resident_memory_bytes().is_none() {
            return;
        }
        let engine = ExecutionEngine::new(true);
        let request = ExecutionRequest::new("mem");
        let execution = engine
            .evaluate(&request, "let a = []; for i in 0..10000 { a.push(i) } result = a.len();")
            .unwrap();
        assert_eq!(execution.result.result, json!(10000));
        assert!(execution.result.memory_usage_bytes.is_some());
    }

    #[test]
    fn division_by_zero_is_an_execution_error() {
        let engine = ExecutionEngine::new(false);
        let request = ExecutionRequest::new("div").with_param("x", 1);
        let err = engine
            .evaluate(&request, "let d = params.x - 1; result = 10 / d;")
            .unwrap_err();
        assert!(err.message.to_lowercase().contains("division by zero"));
    }

    #[test]
    fn output_is_captured_not_returned() {
        let engine = ExecutionEngine::new(false);
        let request = ExecutionRequest::new("out");
        let execution = engine
            .evaluate(&request, r#"print("secret output"); result = "ok";"#)
            .unwrap();
        assert_eq!(execution.output.stdout, "secret output\n");
        let body = serde_json::to_string(&execution.result).unwrap();
        assert!(!body.contains("secret output"));
    }

    #[test]
    fn captured_output_is_logged_with_request_id() {
        let engine = ExecutionEngine::new(false);
        let request = ExecutionRequest::new("log-req-7");
        let logs = capture_logs(|| {
            engine
                .evaluate(&request, r#"print("marker"); eprint("oops"); result = 1;"#)
                .unwrap();
        });

        let stdout_line = logs
            .lines()
            .find(|line| line.contains("STDOUT: marker"))
            .unwrap_or_else(|| panic!("no stdout line in:\n{logs}"));
        assert!(stdout_line.contains("request_id=log-req-7"));
        assert!(stdout_line.contains("INFO"));

        let stderr_line = logs
            .lines()
            .find(|line| line.contains("STDERR: oops"))
            .unwrap_or_else(|| panic!("no stderr line in:\n{logs}"));
        assert!(stderr_line.contains("request_id=log-req-7"));
        assert!(stderr_line.contains("WARN"));
    }

    #[test]
    fn output_is_logged_for_failed_runs() {
        let engine = ExecutionEngine::new(false);
        let request = ExecutionRequest::new("log-req-8");
        let logs = capture_logs(|| {
            engine
                .evaluate(&request, r#"print("before fault"); throw "fault";"#)
                .unwrap_err();
        });

        assert!(logs
            .lines()
            .any(|line| line.contains("STDOUT: before fault") && line.contains("request_id=log-req-8")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_namespaces_are_isolated() {
        let engine = ExecutionEngine::new(false);
        let script = "let value = params.v; sleep(30); result = value;".to_string();
        let a = ExecutionRequest::new("a").with_param("v", "first");
        let b = ExecutionRequest::new("b").with_param("v", "second");

        let (ra, rb) = tokio::join!(
            engine.run_script(&a, script.clone()),
            engine.run_script(&b, script.clone()),
        );
        assert_eq!(ra.unwrap().result.result, json!("first"));
        assert_eq!(rb.unwrap().result.result, json!("second"));
    }

    #[tokio::test]
    async fn bindings_do_not_leak_between_requests() {
        let engine = ExecutionEngine::new(false);
        let first = ExecutionRequest::new("first");
        engine
            .run_script(&first, "let leaked = 42; fn helper() { 1 }".to_string())
            .await
            .unwrap();

        let second = ExecutionRequest::new("second");
        let err = engine
            .run_script(&second, "result = leaked;".to_string())
            .await
            .unwrap_err();
        assert!(err.message.contains("leaked"));

        let err = engine
            .run_script(&second, "result = helper();".to_string())
            .await
            .unwrap_err();
        assert!(err.message.contains("helper"));
    }

    #[tokio::test]
    async fn handler_is_timed() {
        struct SlowHandler;

        #[async_trait::async_trait]
        impl Handler for SlowHandler {
            async fn handle(
                &self,
                _request_id: &str,
                params: &Value,
                _context: &Value,
            ) -> Result<Value, ExecutionError> {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(params.clone())
            }
        }

        let engine = ExecutionEngine::new(false);
        let request = ExecutionRequest::new("h").with_param("k", "v");
        let execution = engine.run_handler(&SlowHandler, &request).await.unwrap();
        assert_eq!(execution.result.result, json!({"k": "v"}));
        assert!(execution.result.execution_time_ms >= 20);
    }
}

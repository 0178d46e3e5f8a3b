//! Per-request evaluation namespace.
//!
//! Every request gets its own `rhai::Engine` and `rhai::Scope`. Print and
//! debug callbacks are bound to buffers owned by that request, so captured
//! output never crosses request boundaries and no process-wide stream is
//! redirected.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rhai::{CallFnOptions, Dynamic, Engine, EvalAltResult, FnPtr, ParseError, Scope, AST, INT};
use serde_json::{Number, Value};
use tracing::{error, info, warn};

use crate::error::ExecutionError;
use crate::model::{CapturedOutput, ExecutionRequest};

/// Entry point invoked with `params` when the script defines it, either as a
/// `fn` or as a function pointer or closure bound to that name.
pub const HANDLE_FN: &str = "handle";

/// Variable read back when the script defines no `handle` function.
pub const RESULT_VAR: &str = "result";

/// Request-scoped stdout/stderr buffers.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffers {
    stdout: Arc<Mutex<String>>,
    stderr: Arc<Mutex<String>>,
}

impl OutputBuffers {
    /// Drain both buffers.
    pub fn take(&self) -> CapturedOutput {
        CapturedOutput {
            stdout: std::mem::take(&mut *lock(&self.stdout)),
            stderr: std::mem::take(&mut *lock(&self.stderr)),
        }
    }
}

fn lock(buf: &Mutex<String>) -> std::sync::MutexGuard<'_, String> {
    buf.lock().unwrap_or_else(PoisonError::into_inner)
}

fn append_line(buf: &Mutex<String>, text: &str) {
    let mut buf = lock(buf);
    buf.push_str(text);
    buf.push('\n');
}

/// The `logger` object seeded into every namespace.
#[derive(Debug, Clone)]
pub struct ScriptLogger {
    request_id: Arc<str>,
}

impl ScriptLogger {
    pub fn new(request_id: &str) -> Self {
        Self {
            request_id: request_id.into(),
        }
    }

    fn info(&mut self, message: Dynamic) {
        info!(request_id = %self.request_id, "{message}");
    }

    fn warn(&mut self, message: Dynamic) {
        warn!(request_id = %self.request_id, "{message}");
    }

    fn error(&mut self, message: Dynamic) {
        error!(request_id = %self.request_id, "{message}");
    }
}

fn sleep_ms(ms: INT) {
    if let Ok(ms) = u64::try_from(ms) {
        std::thread::sleep(Duration::from_millis(ms));
    }
}

/// Build a fresh engine whose output callbacks write into `buffers`.
///
/// `print` goes to stdout; `debug` and `eprint` go to stderr.
pub fn build_engine(buffers: &OutputBuffers) -> Engine {
    let mut engine = Engine::new();

    let stdout = Arc::clone(&buffers.stdout);
    engine.on_print(move |text| append_line(&stdout, text));

    let stderr = Arc::clone(&buffers.stderr);
    engine.on_debug(move |text, _source, _pos| append_line(&stderr, text));

    let stderr = Arc::clone(&buffers.stderr);
    engine.register_fn("eprint", move |text: Dynamic| {
        append_line(&stderr, &text.to_string());
    });

    engine.register_fn("sleep", sleep_ms);

    engine
        .register_type_with_name::<ScriptLogger>("Logger")
        .register_fn("info", ScriptLogger::info)
        .register_fn("warn", ScriptLogger::warn)
        .register_fn("error", ScriptLogger::error);

    engine
}

/// Convert a JSON value into a script value.
///
/// Script integers are `i64`; unsigned values above `i64::MAX` are rejected
/// instead of being widened to floats.
pub fn to_dynamic(value: &Value) -> Result<Dynamic, ExecutionError> {
    if let Some(n) = wide_integer(value) {
        return Err(ExecutionError::new(format!(
            "Failed to convert input: integer {n} is out of range"
        )));
    }
    rhai::serde::to_dynamic(value)
        .map_err(|e| ExecutionError::new(format!("Failed to convert input: {e}")))
}

fn wide_integer(value: &Value) -> Option<&Number> {
    match value {
        Value::Number(n) if n.is_u64() && n.as_i64().is_none() => Some(n),
        Value::Array(items) => items.iter().find_map(wide_integer),
        Value::Object(map) => map.values().find_map(wide_integer),
        _ => None,
    }
}

/// Convert a script value back into JSON.
pub fn to_json(value: &Dynamic) -> Result<Value, ExecutionError> {
    rhai::serde::from_dynamic::<Value>(value).map_err(|e| {
        ExecutionError::new(format!(
            "Result of type '{}' is not JSON-serializable: {e}",
            value.type_name()
        ))
    })
}

/// Whether the script defines a `handle` function.
pub fn defines_handle(ast: &AST) -> bool {
    ast.iter_functions().any(|f| f.name == HANDLE_FN)
}

pub fn parse_error(err: &ParseError) -> ExecutionError {
    ExecutionError::with_trace(format!("Syntax error: {err}"), format!("{err:?}"))
}

/// Turn an evaluation fault into an `ExecutionError`.
///
/// The message is the innermost fault. The trace lists it followed by every
/// function-call frame it propagated through, innermost first.
pub fn eval_error(err: &EvalAltResult) -> ExecutionError {
    let mut frames = Vec::new();
    let mut current = err;
    while let EvalAltResult::ErrorInFunctionCall(name, _source, inner, pos) = current {
        frames.push(format!("  in call to function '{name}' ({pos})"));
        current = inner.as_ref();
    }

    let message = current.to_string();
    let mut trace = message.clone();
    for frame in frames.iter().rev() {
        trace.push('\n');
        trace.push_str(frame);
    }
    ExecutionError::with_trace(message, trace)
}

/// The isolated evaluation scope for one request.
pub struct Namespace {
    engine: Engine,
    scope: Scope<'static>,
    params: Dynamic,
    buffers: OutputBuffers,
}

impl Namespace {
    /// Create a namespace seeded with `params`, `context`, `logger`,
    /// `request_id` and an unset `result`.
    pub fn new(request: &ExecutionRequest) -> Result<Self, ExecutionError> {
        let buffers = OutputBuffers::default();
        let engine = build_engine(&buffers);

        let params = to_dynamic(&request.params_value())?;
        let context = to_dynamic(&request.context_value())?;

        let mut scope = Scope::new();
        scope.push_dynamic("params", params.clone());
        scope.push_dynamic("context", context);
        scope.push("logger", ScriptLogger::new(&request.request_id));
        scope.push("request_id", request.request_id.clone());
        scope.push_dynamic(RESULT_VAR, Dynamic::UNIT);

        Ok(Self {
            engine,
            scope,
            params,
            buffers,
        })
    }

    /// Evaluate `body` and extract its result.
    ///
    /// A `handle` function, or a callable bound to `handle`, wins over the
    /// `result` variable. Top-level statements run exactly once either way.
    pub fn evaluate(&mut self, body: &str) -> Result<Value, ExecutionError> {
        let ast = self.engine.compile(body).map_err(|e| parse_error(&e))?;

        self.engine
            .run_ast_with_scope(&mut self.scope, &ast)
            .map_err(|e| eval_error(&e))?;

        let value = if defines_handle(&ast) {
            let options = CallFnOptions::new().eval_ast(false);
            self.engine
                .call_fn_with_options::<Dynamic>(
                    options,
                    &mut self.scope,
                    &ast,
                    HANDLE_FN,
                    (self.params.clone(),),
                )
                .map_err(|e| eval_error(&e))?
        } else if let Some(handle) = self.scope.get_value::<FnPtr>(HANDLE_FN) {
            handle
                .call::<Dynamic>(&self.engine, &ast, (self.params.clone(),))
                .map_err(|e| eval_error(&e))?
        } else {
            self.scope
                .get_value::<Dynamic>(RESULT_VAR)
                .unwrap_or(Dynamic::UNIT)
        };

        to_json(&value)
    }

    /// Output captured so far.
    pub fn take_output(&self) -> CapturedOutput {
        self.buffers.take()
    }
}

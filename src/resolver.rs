//! Code resolution.
//!
//! Decides what a request executes. Strategies are tried in a fixed order
//! (inline script, registry script, handler) and the first one that
//! resolves wins; results are never merged.

mod handler;
mod registry;

pub use handler::{Handler, ScriptHandler, HANDLER_FILE};
pub use registry::{ScriptRegistry, SCRIPT_EXTENSION};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::ExecutionRequest;

/// Where a script body came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOrigin {
    Inline,
    Registry { title: String },
}

/// The single unit of code chosen for a request.
pub enum ResolvedUnit {
    /// Source text to evaluate in a fresh namespace.
    Script { origin: ScriptOrigin, body: String },
    /// A handler that takes over the whole request.
    Handler(Arc<dyn Handler>),
}

impl fmt::Debug for ResolvedUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Script { origin, body } => f
                .debug_struct("Script")
                .field("origin", origin)
                .field("body_len", &body.len())
                .finish(),
            Self::Handler(_) => f.write_str("Handler"),
        }
    }
}

/// One step of the resolution chain.
///
/// `Ok(None)` means "not applicable, try the next strategy".
#[async_trait]
pub trait ResolveStrategy: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn resolve(&self, request: &ExecutionRequest) -> Result<Option<ResolvedUnit>>;
}

/// Uses `script_content` verbatim when present and non-empty.
#[derive(Debug, Default)]
pub struct InlineStrategy;

#[async_trait]
impl ResolveStrategy for InlineStrategy {
    fn name(&self) -> &'static str {
        "inline"
    }

    async fn resolve(&self, request: &ExecutionRequest) -> Result<Option<ResolvedUnit>> {
        Ok(request.inline_script().map(|body| ResolvedUnit::Script {
            origin: ScriptOrigin::Inline,
            body: body.to_string(),
        }))
    }
}

/// Loads the script named by `context.language_title` from the registry.
#[derive(Debug)]
pub struct RegistryStrategy {
    registry: ScriptRegistry,
}

impl RegistryStrategy {
    pub const fn new(registry: ScriptRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ResolveStrategy for RegistryStrategy {
    fn name(&self) -> &'static str {
        "registry"
    }

    async fn resolve(&self, request: &ExecutionRequest) -> Result<Option<ResolvedUnit>> {
        let title = request.language_title();
        Ok(self.registry.load(title).await?.map(|body| ResolvedUnit::Script {
            origin: ScriptOrigin::Registry {
                title: title.to_string(),
            },
            body,
        }))
    }
}

/// Delegates to a pre-registered handler.
pub struct HandlerStrategy {
    handler: Arc<dyn Handler>,
}

impl HandlerStrategy {
    pub fn new(handler: Arc<dyn Handler>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl ResolveStrategy for HandlerStrategy {
    fn name(&self) -> &'static str {
        "handler"
    }

    async fn resolve(&self, _request: &ExecutionRequest) -> Result<Option<ResolvedUnit>> {
        Ok(Some(ResolvedUnit::Handler(Arc::clone(&self.handler))))
    }
}

/// Ordered chain of resolution strategies.
pub struct CodeResolver {
    strategies: Vec<Box<dyn ResolveStrategy>>,
}

impl CodeResolver {
    /// Inline, then registry, then (if given) the handler.
    pub fn new(registry: ScriptRegistry, handler: Option<Arc<dyn Handler>>) -> Self {
        let mut strategies: Vec<Box<dyn ResolveStrategy>> = vec![
            Box::new(InlineStrategy),
            Box::new(RegistryStrategy::new(registry)),
        ];
        if let Some(handler) = handler {
            strategies.push(Box::new(HandlerStrategy::new(handler)));
        }
        Self { strategies }
    }

    /// Build a resolver from an explicit strategy list.
    pub fn from_strategies(strategies: Vec<Box<dyn ResolveStrategy>>) -> Self {
        Self { strategies }
    }

    /// Resolve the request to exactly one unit, or `NotFound`.
    pub async fn resolve(&self, request: &ExecutionRequest) -> Result<ResolvedUnit> {
        for strategy in &self.strategies {
            if let Some(unit) = strategy.resolve(request).await? {
                debug!(
                    request_id = %request.request_id,
                    strategy = strategy.name(),
                    "Resolved code"
                );
                return Ok(unit);
            }
        }

        Err(Error::not_found(format!(
            "Script not found for language title: {} (no handler registered)",
            request.language_title()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecutionError;
    use serde_json::Value;

    struct EchoHandler;

    #[async_trait]
    impl Handler for EchoHandler {
        async fn handle(
            &self,
            _request_id: &str,
            params: &Value,
            _context: &Value,
        ) -> std::result::Result<Value, ExecutionError> {
            Ok(params.clone())
        }
    }

    fn registry_with(titles: &[(&str, &str)]) -> (tempfile::TempDir, ScriptRegistry) {
        let dir = tempfile::tempdir().unwrap();
        for (title, body) in titles {
            std::fs::write(dir.path().join(format!("{title}.{SCRIPT_EXTENSION}")), body).unwrap();
        }
        let registry = ScriptRegistry::new(dir.path());
        (dir, registry)
    }

    fn body_of(unit: ResolvedUnit) -> (ScriptOrigin, String) {
        match unit {
            ResolvedUnit::Script { origin, body } => (origin, body),
            ResolvedUnit::Handler(_) => panic!("expected a script"),
        }
    }

    #[tokio::test]
    async fn inline_wins_over_registry() {
        let (_dir, registry) = registry_with(&[("python", "result = \"from registry\";")]);
        let resolver = CodeResolver::new(registry, Some(Arc::new(EchoHandler)));
        let request = ExecutionRequest::new("r1")
            .with_script("result = \"inline\";")
            .with_context("language_title", "python");

        let (origin, body) = body_of(resolver.resolve(&request).await.unwrap());
        assert_eq!(origin, ScriptOrigin::Inline);
        assert_eq!(body, "result = \"inline\";");
    }

    #[tokio::test]
    async fn registry_script_by_title() {
        let (_dir, registry) = registry_with(&[("python", "result = 1;")]);
        let resolver = CodeResolver::new(registry, None);
        let request = ExecutionRequest::new("r1").with_context("language_title", "python");

        let (origin, body) = body_of(resolver.resolve(&request).await.unwrap());
        assert_eq!(
            origin,
            ScriptOrigin::Registry {
                title: "python".into()
            }
        );
        assert_eq!(body, "result = 1;");
    }

    #[tokio::test]
    async fn default_title_when_context_is_empty() {
        let (_dir, registry) = registry_with(&[("default", "result = 0;")]);
        let resolver = CodeResolver::new(registry, None);

        let (origin, _) = body_of(resolver.resolve(&ExecutionRequest::new("r1")).await.unwrap());
        assert_eq!(
            origin,
            ScriptOrigin::Registry {
                title: "default".into()
            }
        );
    }

    #[tokio::test]
    async fn empty_inline_falls_through_to_registry() {
        let (_dir, registry) = registry_with(&[("default", "result = 0;")]);
        let resolver = CodeResolver::new(registry, None);
        let request = ExecutionRequest::new("r1").with_script("");

        let (origin, _) = body_of(resolver.resolve(&request).await.unwrap());
        assert!(matches!(origin, ScriptOrigin::Registry { .. }));
    }

    #[tokio::test]
    async fn handler_only_when_nothing_else_resolves() {
        let (_dir, registry) = registry_with(&[]);
        let resolver = CodeResolver::new(registry, Some(Arc::new(EchoHandler)));
        let request = ExecutionRequest::new("r1").with_context("language_title", "missing_lang");

        assert!(matches!(
            resolver.resolve(&request).await.unwrap(),
            ResolvedUnit::Handler(_)
        ));
    }

    #[tokio::test]
    async fn missing_title_is_not_found() {
        let (_dir, registry) = registry_with(&[("python", "result = 1;")]);
        let resolver = CodeResolver::new(registry, None);
        let request = ExecutionRequest::new("r1").with_context("language_title", "missing_lang");

        let err = resolver.resolve(&request).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(err.to_string().contains("missing_lang"));
    }

    #[tokio::test]
    async fn custom_strategy_chain() {
        let resolver = CodeResolver::from_strategies(vec![Box::new(InlineStrategy)]);
        let err = resolver
            .resolve(&ExecutionRequest::new("r1"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
    }
}

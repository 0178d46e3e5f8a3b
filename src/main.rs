//! script-runtime
//!
//! HTTP runtime that executes Rhai scripts on behalf of a dispatcher.
//! Settings come from environment variables; flags below override them.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use script_runtime::audit::{self as audit_log, AuditDispatcher, PostgresAuditSink};
use script_runtime::config::Config;
use script_runtime::engine::ExecutionEngine;
use script_runtime::resolver::{CodeResolver, Handler, ScriptHandler, ScriptRegistry};
use script_runtime::service::RuntimeService;
use script_runtime::transport;

/// How long shutdown waits for queued audit records to be written.
const AUDIT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "script-runtime")]
#[command(about = "HTTP runtime that executes Rhai scripts")]
struct Args {
    /// Port to listen on (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error); overrides LOG_LEVEL
    #[arg(long)]
    log_level: Option<String>,

    /// Script registry directory (overrides SCRIPTS_DIR)
    #[arg(long)]
    scripts_dir: Option<PathBuf>,

    /// Handler directory (overrides FUNCTION_DIR)
    #[arg(long)]
    function_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config loading can warn, so the subscriber comes first.
    let log_level = args
        .log_level
        .or_else(|| std::env::var("LOG_LEVEL").ok())
        .unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.port = port;
    }
    config.log_level = log_level;
    if let Some(dir) = args.scripts_dir {
        config.scripts_dir = dir;
    }
    if let Some(dir) = args.function_dir {
        config.function_dir = dir;
    }

    info!(?config, "Loaded configuration");

    let handler = ScriptHandler::discover(&config.function_dir)
        .context("Failed to load handler module")?
        .map(|h| Arc::new(h) as Arc<dyn Handler>);

    if !config.scripts_dir.is_dir() {
        warn!(path = %config.scripts_dir.display(), "Script registry directory does not exist");
    }

    let resolver = CodeResolver::new(ScriptRegistry::new(&config.scripts_dir), handler);

    let (audit, audit_worker) = match (config.audit.enabled, config.audit.database_url.as_deref()) {
        (true, Some(url)) => {
            info!("Audit logging enabled");
            let sink = Arc::new(PostgresAuditSink::new(url));
            let (dispatcher, worker) = AuditDispatcher::spawn(sink, config.audit.queue_capacity);
            (dispatcher, Some(worker))
        }
        _ => (AuditDispatcher::disabled(), None),
    };

    let service = RuntimeService::new(
        resolver,
        ExecutionEngine::new(config.measure_memory),
        audit,
        config.audit.record_not_found,
    );

    // Dropping the router releases the last audit sender.
    transport::serve(Arc::new(service), config.port).await?;

    if let Some(worker) = audit_worker {
        info!("Flushing pending audit records");
        audit_log::flush(worker, AUDIT_FLUSH_TIMEOUT).await;
    }
    Ok(())
}

//! Runtime configuration.
//!
//! Read once at startup from environment variables; CLI flags in `main`
//! override the listener and directory settings.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tracing::warn;

use crate::audit::DEFAULT_QUEUE_CAPACITY;

/// Top-level configuration for the runtime.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port to listen on (bound on all interfaces).
    pub port: u16,

    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,

    /// Directory holding `<language_title>.rhai` scripts.
    pub scripts_dir: PathBuf,

    /// Directory searched for `handler.rhai`.
    pub function_dir: PathBuf,

    /// Whether to report the resident-memory delta of each execution.
    pub measure_memory: bool,

    /// Audit persistence settings.
    pub audit: AuditConfig,
}

/// Audit sink settings.
#[derive(Clone, Default)]
pub struct AuditConfig {
    /// Whether records are written at all.
    pub enabled: bool,

    /// PostgreSQL connection string.
    pub database_url: Option<String>,

    /// Whether unresolvable requests produce a `SCRIPT_NOT_FOUND` record.
    pub record_not_found: bool,

    /// Capacity of the in-memory audit queue.
    pub queue_capacity: usize,
}

impl std::fmt::Debug for AuditConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditConfig")
            .field("enabled", &self.enabled)
            .field("database_url", &self.database_url.as_ref().map(|_| "<redacted>"))
            .field("record_not_found", &self.record_not_found)
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            log_level: "info".into(),
            scripts_dir: "./scripts".into(),
            function_dir: "./function".into(),
            measure_memory: true,
            audit: AuditConfig {
                enabled: false,
                database_url: None,
                record_not_found: true,
                queue_capacity: DEFAULT_QUEUE_CAPACITY,
            },
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    ///
    /// Recognized: `PORT`, `LOG_LEVEL`, `SCRIPTS_DIR`, `FUNCTION_DIR`,
    /// `MEASURE_MEMORY`, `DB_LOGGING_ENABLED`, `DATABASE_URL`,
    /// `AUDIT_RECORD_NOT_FOUND`, `AUDIT_QUEUE_CAPACITY`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let port = match lookup("PORT") {
            Some(v) => v
                .trim()
                .parse()
                .with_context(|| format!("PORT must be a port number, got '{v}'"))?,
            None => defaults.port,
        };

        let queue_capacity = match lookup("AUDIT_QUEUE_CAPACITY") {
            Some(v) => v
                .trim()
                .parse()
                .with_context(|| format!("AUDIT_QUEUE_CAPACITY must be a number, got '{v}'"))?,
            None => defaults.audit.queue_capacity,
        };

        let mut audit = AuditConfig {
            enabled: parse_flag(&lookup, "DB_LOGGING_ENABLED", defaults.audit.enabled)?,
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            record_not_found: parse_flag(
                &lookup,
                "AUDIT_RECORD_NOT_FOUND",
                defaults.audit.record_not_found,
            )?,
            queue_capacity,
        };

        if audit.enabled && audit.database_url.is_none() {
            warn!("DB_LOGGING_ENABLED is set but DATABASE_URL is missing; audit logging disabled");
            audit.enabled = false;
        }

        Ok(Self {
            port,
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
            scripts_dir: lookup("SCRIPTS_DIR").map_or(defaults.scripts_dir, PathBuf::from),
            function_dir: lookup("FUNCTION_DIR").map_or(defaults.function_dir, PathBuf::from),
            measure_memory: parse_flag(&lookup, "MEASURE_MEMORY", defaults.measure_memory)?,
            audit,
        })
    }
}

fn parse_flag(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> Result<bool> {
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        other => bail!("{key} must be a boolean, got '{other}'"),
    }
}

const fn default_port() -> u16 {
    8080
}

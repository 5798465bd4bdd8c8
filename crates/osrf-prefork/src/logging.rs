//! Logging setup for the listener and its workers.
//!
//! The listener and every drone it forks share one process-wide subscriber,
//! initialized once before the pool manager starts. A forked child inherits
//! whatever the parent already set up rather than reinitializing, since
//! `init` is idempotent.
//!
//! The subscriber writes synchronously: no non-blocking appender, no
//! background flush thread. A worker that has just forked has exactly one
//! thread, and a logging layer that depends on a writer thread from the
//! parent would silently stop flushing in the child.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Output format for the process-wide subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub enum OutputFormat {
    /// Human-readable text, one line per event plus any span fields.
    #[default]
    Text,
    /// Newline-delimited JSON, one object per event.
    Json,
}

/// Logging configuration, normally built from [`crate::config::AppConfig`].
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum level, used when `RUST_LOG` is unset.
    pub level: String,
    pub format: OutputFormat,
    /// Use ANSI color codes (text format only).
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: OutputFormat::default(),
            ansi: true,
        }
    }
}

impl LogConfig {
    pub fn production() -> Self {
        Self {
            level: "info".to_string(),
            format: OutputFormat::Json,
            ansi: false,
        }
    }

    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            format: OutputFormat::Text,
            ansi: true,
        }
    }
}

static LOGGING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize the process-wide subscriber. Safe to call more than once;
/// only the first call takes effect, so a child can call it again after
/// `fork()` without consequence.
///
/// Enters a process-wide span carrying `pid`, and `app` when `app_name` is
/// given, and leaks the guard so it stays entered for the rest of the
/// thread's life — every event logged afterward on this thread carries
/// those fields, so listener and drone output can be told apart in a
/// shared log stream. A forked worker additionally enters its own `worker`
/// span tagging its own pid; see [`crate::pool::manager`]'s `run_child`.
pub fn init(config: &LogConfig, app_name: Option<&str>) {
    if LOGGING_INITIALIZED.get().is_some() {
        return;
    }
    if LOGGING_INITIALIZED.set(()).is_err() {
        return;
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let pid = std::process::id();
    let app = app_name.unwrap_or("-").to_string();

    let result = match config.format {
        OutputFormat::Json => {
            let layer = fmt::layer().json().with_filter(env_filter);
            tracing_subscriber::registry().with(layer).try_init()
        }
        OutputFormat::Text => {
            let layer = fmt::layer().with_ansi(config.ansi).with_filter(env_filter);
            tracing_subscriber::registry().with(layer).try_init()
        }
    };

    if let Err(e) = result {
        eprintln!("failed to initialize logging: {e}");
        return;
    }

    let span = tracing::info_span!("process", pid, app = %app);
    std::mem::forget(span.entered());

    tracing::info!("logging initialized");
}

/// Initialize with defaults, for callers (tests, small tools) that don't
/// build a full [`LogConfig`].
pub fn init_default() {
    init(&LogConfig::default(), None);
}

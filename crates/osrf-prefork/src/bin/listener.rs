//! `osrf-listener` — CLI entrypoint for the pool manager.
//!
//! Wires a configuration document and the process-wide logging subscriber,
//! then hands off to [`osrf_prefork::PoolManager::run`]. The cache client is
//! not connected here: the pool manager only validates the configured
//! addresses are reachable before forking, and each worker connects its own
//! handle after fork. Ships with [`osrf_prefork::bus::StdioBus`] as its
//! transport, a line-oriented stand-in for the real message bus so this
//! binary is runnable without one.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use osrf_prefork::bus::{Message, StdioBus};
use osrf_prefork::config::AppConfig;
use osrf_prefork::logging::{self, LogConfig};
use osrf_prefork::session::{Session, SessionLayer};
use osrf_prefork::worker::NoopHooks;
use osrf_prefork::{PoolManager, Result};

#[derive(Parser, Debug)]
#[command(name = "osrf-listener", about = "Pre-forked worker-pool listener")]
struct Args {
    /// Application name this listener serves, e.g. "opensrf.math".
    app_name: String,

    /// Path to the YAML configuration document.
    #[arg(short, long, default_value = "opensrf.yml")]
    config: PathBuf,

    /// Cache server addresses, e.g. "127.0.0.1:6379". May be repeated.
    #[arg(long = "cache-addr")]
    cache_addrs: Vec<String>,

    /// Cluster-wide cache TTL ceiling, in seconds.
    #[arg(long, default_value_t = 3600)]
    cache_ttl_ceiling: u64,

    /// Emit logs as JSON instead of human-readable text.
    #[arg(long)]
    json_logs: bool,
}

/// A stateless session layer: every call is handled in full by `dispatch`,
/// so no worker ever enters the keepalive loop. Stand-in for an
/// application's real request router.
struct StatelessSessionLayer;

impl SessionLayer for StatelessSessionLayer {
    fn dispatch(&self, message: Message) -> Result<Option<Box<dyn Session>>> {
        tracing::debug!(to = %message.to, len = message.body.len(), "dispatching message");
        Ok(None)
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_config = if args.json_logs {
        LogConfig::production()
    } else {
        LogConfig::default()
    };
    logging::init(&log_config, Some(&args.app_name));

    let app_config = AppConfig::load(&args.config)?;
    let pool_config = app_config.pool_config(&args.app_name)?;

    let mut manager = PoolManager::<StdioBus>::new(
        args.app_name.clone(),
        pool_config,
        Arc::new(StatelessSessionLayer),
        Box::new(|| Box::new(NoopHooks)),
        args.cache_addrs.clone(),
        args.cache_ttl_ceiling,
    )?;

    manager.run(app_config.routers(), app_config.router_name())?;
    Ok(())
}

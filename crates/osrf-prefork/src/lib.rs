//! Listener-side concurrency core of an OpenSRF-style RPC service.
//!
//! A long-lived parent process accepts framed application messages from a
//! message bus, dispatches each to one of a pool of pre-forked worker
//! processes, and keeps that pool sized within configured bounds while
//! workers are recycled after serving a bounded number of requests. The
//! parent also registers the application's name with one or more upstream
//! routers, and a small process-wide cache client is available to workers
//! for memoizing deterministic responses.
//!
//! The pool manager and worker loop are strictly single-threaded and
//! blocking, by design: see [`pool::manager`] for why this core never runs
//! on an async executor.

pub mod bus;
pub mod cache;
pub mod config;
pub mod errors;
pub mod logging;
pub mod memoize;
pub mod pool;
pub mod process_title;
pub mod router;
pub mod session;
pub mod signals;
pub mod worker;

pub use config::AppConfig;
pub use errors::{PreforkError, Result};
pub use pool::PoolManager;

//! Error types for the prefork worker-pool core.
//!
//! Every fallible operation in this crate returns the crate-wide [`Result`]
//! alias. Variants are grouped the way §7 of the design groups them:
//! configuration errors are fatal before the dispatch loop starts, spawn and
//! transport errors are scoped to a single worker, and cache errors never
//! propagate past the cache client itself.

use std::path::PathBuf;
use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, PreforkError>;

/// Top-level error type for the prefork core.
#[derive(Debug, Error)]
pub enum PreforkError {
    /// Configuration is missing, malformed, or violates a documented bound.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A pipe or fork syscall failed while spawning a worker.
    #[error("failed to spawn worker: {0}")]
    Spawn(#[from] SpawnError),

    /// A parent<->worker pipe read or write failed outside of spawn.
    #[error("transport error: {0}")]
    Transport(String),

    /// The bus client reported an error or a malformed message.
    #[error("bus error: {0}")]
    Bus(String),

    /// Wraps a cache backend error.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// No workers remain (idle, active, or free) while the pool is running.
    #[error("worker pool is empty, nothing left to dispatch to")]
    PoolExhausted,

    /// Wraps a low-level OS error from `nix`.
    #[error("OS error: {0}")]
    Os(#[from] nix::Error),

    /// Wraps a standard library I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else, preserved with its original context.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration-specific errors, surfaced before any worker is spawned.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `run()` was called without an application name.
    #[error("an application name is required")]
    MissingAppName,

    /// The on-disk config document could not be parsed.
    #[error("failed to parse configuration document {path}: {source}")]
    Malformed {
        /// Path to the document that failed to parse.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_yaml::Error,
    },

    /// The config document could not be read from disk.
    #[error("failed to read configuration document {path}: {source}")]
    Unreadable {
        /// Path that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// `min_children` exceeds `max_children`.
    #[error("min_children ({min}) is greater than max_children ({max})")]
    MinExceedsMax {
        /// Configured minimum.
        min: usize,
        /// Configured maximum.
        max: usize,
    },

    /// `max_children` exceeds the absolute safety ceiling.
    #[error("max_children ({max}) is greater than the absolute ceiling ({ceiling})")]
    ExceedsAbsoluteCeiling {
        /// Configured maximum.
        max: usize,
        /// The hard ceiling that can never be exceeded.
        ceiling: usize,
    },
}

/// Errors raised while spawning a new worker process.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// Creating one of the two pipe pairs failed.
    #[error("failed to create pipe: {0}")]
    Pipe(#[source] nix::Error),

    /// The `fork()` syscall itself failed.
    #[error("fork() failed: {0}")]
    Fork(#[source] nix::Error),

    /// The child's own initialization (cache connect, app init hook, ...) failed.
    #[error("worker initialization failed: {0}")]
    ChildInit(String),
}

/// Errors raised by the cache client. Callers of `put_*`/`remove` never see
/// these directly (§4.3: cache errors are logged and swallowed); they are
/// exposed here so the client itself, and its tests, can distinguish cases.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backend connection could not be established or was lost.
    #[error("cache backend unavailable: {0}")]
    Backend(String),

    /// A structured value failed to serialize or deserialize.
    #[error("failed to (de)serialize cached value: {0}")]
    Codec(#[from] serde_json::Error),
}

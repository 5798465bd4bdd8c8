//! Process-wide cache client for idempotency and memoization.

mod backend;
mod client;
mod normalize;

pub use backend::{CacheBackend, RedisBackend};
pub use client::{global, init_global, shutdown_global, validate_reachable, CacheClient};
pub use normalize::{clamp_ttl, normalize_key, MAX_KEY_LEN};

#[cfg(test)]
pub(crate) use backend::fake;

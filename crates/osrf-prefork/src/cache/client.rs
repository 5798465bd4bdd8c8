//! The process-wide cache client.
//!
//! One client per process, initialized once with a list of cache-server
//! addresses and a TTL ceiling, then used by the pool manager, workers, and
//! the memoizing example method alike.

use std::sync::{Mutex, OnceLock};

use serde::{de::DeserializeOwned, Serialize};

use super::backend::CacheBackend;
use super::normalize::{clamp_ttl, normalize_key};
use crate::errors::Result;

/// A key-value client with per-entry TTLs, backed by a pluggable
/// [`CacheBackend`]. Write and remove errors are logged and swallowed;
/// read errors are treated as a cache miss. The cache is never load-bearing
/// for the pool manager's own correctness.
///
/// The backend is held behind `Option` so [`Self::shutdown`] can release it:
/// every operation after that treats the client as perpetually empty rather
/// than panicking or reconnecting on its own.
pub struct CacheClient<B: CacheBackend> {
    backend: Mutex<Option<B>>,
    ttl_ceiling_seconds: u64,
}

impl<B: CacheBackend> CacheClient<B> {
    pub fn new(backend: B, ttl_ceiling_seconds: u64) -> Self {
        Self {
            backend: Mutex::new(Some(backend)),
            ttl_ceiling_seconds,
        }
    }

    /// Store an opaque byte string. Overwrites on key conflict.
    pub fn put_string(&self, key: &str, value: &[u8], ttl_seconds: i64) {
        let key = normalize_key(key);
        let ttl = clamp_ttl(ttl_seconds, self.ttl_ceiling_seconds);
        let mut guard = self.backend.lock().unwrap();
        let Some(backend) = guard.as_mut() else {
            return;
        };
        if let Err(err) = backend.set(&key, value, ttl) {
            tracing::warn!(%key, %err, "cache put_string failed");
        }
    }

    /// Serialize `value` to its canonical text form, then [`Self::put_string`].
    pub fn put_structured<T: Serialize>(&self, key: &str, value: &T, ttl_seconds: i64) {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.put_string(key, &bytes, ttl_seconds),
            Err(err) => tracing::warn!(%key, %err, "cache put_structured failed to serialize"),
        }
    }

    /// Fetch an opaque byte string, or `None` on a miss or backend error.
    pub fn get_string(&self, key: &str) -> Option<Vec<u8>> {
        let key = normalize_key(key);
        let mut guard = self.backend.lock().unwrap();
        let backend = guard.as_mut()?;
        match backend.get(&key) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(%key, %err, "cache get_string failed");
                None
            }
        }
    }

    /// Fetch and deserialize a structured value.
    pub fn get_structured<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.get_string(key)?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(%key, %err, "cache get_structured failed to deserialize");
                None
            }
        }
    }

    /// Remove a key. A miss is not an error.
    pub fn remove(&self, key: &str) {
        let key = normalize_key(key);
        let mut guard = self.backend.lock().unwrap();
        let Some(backend) = guard.as_mut() else {
            return;
        };
        if let Err(err) = backend.remove(&key) {
            tracing::warn!(%key, %err, "cache remove failed");
        }
    }

    /// Re-set a key's TTL by reading its current value and writing it back.
    ///
    /// If the key is absent, this is a no-op rather than a write of an empty
    /// value — `set_expire` never resurrects a key that has already expired
    /// or was never set (see `DESIGN.md`).
    pub fn set_expire(&self, key: &str, ttl_seconds: i64) {
        let normalized = normalize_key(key);
        let existing = {
            let mut guard = self.backend.lock().unwrap();
            let Some(backend) = guard.as_mut() else {
                return;
            };
            match backend.get(&normalized) {
                Ok(value) => value,
                Err(err) => {
                    tracing::warn!(key = %normalized, %err, "cache set_expire read failed");
                    return;
                }
            }
        };
        let Some(value) = existing else {
            return;
        };
        self.put_string(key, &value, ttl_seconds);
    }

    /// Release the backend connection. Idempotent; every operation after
    /// this point is a no-op read-miss/write-swallow rather than an error.
    pub fn shutdown(&self) {
        self.backend.lock().unwrap().take();
    }
}

/// The process-wide singleton. Each process — the listener before it forks,
/// and every worker after — populates its own instance; the underlying
/// socket must never be shared across the fork boundary.
static GLOBAL: OnceLock<CacheClient<super::backend::RedisBackend>> = OnceLock::new();

/// Initialize this process's cache client. A second call in the same
/// process is a no-op; the first caller's addresses and ceiling win. Must
/// be called again after `fork()` by each worker — the parent's connection
/// is not inherited for cache use.
pub fn init_global(addrs: &[String], ttl_ceiling_seconds: u64) -> Result<()> {
    if GLOBAL.get().is_some() {
        return Ok(());
    }
    let backend = super::backend::RedisBackend::connect(addrs)?;
    let _ = GLOBAL.set(CacheClient::new(backend, ttl_ceiling_seconds));
    Ok(())
}

/// Confirm the cache is reachable without installing a long-lived
/// connection. Intended for the listener to call before forking, so a
/// misconfigured cache address is caught before any worker starts; the
/// connection opened here is dropped immediately.
pub fn validate_reachable(addrs: &[String]) -> Result<()> {
    super::backend::RedisBackend::connect(addrs)?;
    Ok(())
}

/// Access this process's cache client, if initialized.
pub fn global() -> Option<&'static CacheClient<super::backend::RedisBackend>> {
    GLOBAL.get()
}

/// Release this process's cache client's backend connection, if any.
pub fn shutdown_global() {
    if let Some(client) = GLOBAL.get() {
        client.shutdown();
    }
}

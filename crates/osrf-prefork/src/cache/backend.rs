//! The wire protocol to the actual cache server, behind a trait so it can
//! be swapped or faked in tests.

use crate::errors::{CacheError, Result};

/// A key-value backend with per-entry expiry, already-normalized keys in,
/// opaque bytes out. Implementations translate `Result`-level errors from
/// [`crate::errors::CacheError`]; callers in [`super::client`] decide how
/// to treat them (logged and swallowed on write, absent on read).
pub trait CacheBackend: Send {
    fn set(&mut self, key: &str, value: &[u8], ttl_seconds: u64) -> Result<()>;
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>>;
    fn remove(&mut self, key: &str) -> Result<()>;
}

/// Speaks the cache server's native protocol over a plain TCP connection.
pub struct RedisBackend {
    client: redis::Client,
    connection: redis::Connection,
}

impl RedisBackend {
    /// Connect to the first reachable address in `addrs`.
    pub fn connect(addrs: &[String]) -> Result<Self> {
        let mut last_err = None;
        for addr in addrs {
            let url = if addr.starts_with("redis://") {
                addr.clone()
            } else {
                format!("redis://{addr}")
            };
            match redis::Client::open(url.as_str()).and_then(|client| {
                let connection = client.get_connection()?;
                Ok((client, connection))
            }) {
                Ok((client, connection)) => return Ok(Self { client, connection }),
                Err(err) => last_err = Some(err),
            }
        }
        Err(CacheError::Backend(
            last_err.map(|e| e.to_string()).unwrap_or_else(|| "no cache addresses configured".to_string()),
        )
        .into())
    }

    #[allow(dead_code)]
    fn reconnect(&mut self) -> Result<()> {
        self.connection = self
            .client
            .get_connection()
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(())
    }
}

impl CacheBackend for RedisBackend {
    fn set(&mut self, key: &str, value: &[u8], ttl_seconds: u64) -> Result<()> {
        redis::cmd("SETEX")
            .arg(key)
            .arg(ttl_seconds)
            .arg(value)
            .query::<()>(&mut self.connection)
            .map_err(|e| CacheError::Backend(e.to_string()).into())
    }

    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        redis::cmd("GET")
            .arg(key)
            .query::<Option<Vec<u8>>>(&mut self.connection)
            .map_err(|e| CacheError::Backend(e.to_string()).into())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        redis::cmd("DEL")
            .arg(key)
            .query::<()>(&mut self.connection)
            .map_err(|e| CacheError::Backend(e.to_string()).into())
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::HashMap;

    /// An in-memory backend for tests; ignores TTL, so expiry scenarios are
    /// exercised at the normalization/clamping level instead.
    #[derive(Debug, Default)]
    pub struct FakeBackend {
        pub store: HashMap<String, Vec<u8>>,
        pub fail_next: bool,
    }

    impl CacheBackend for FakeBackend {
        fn set(&mut self, key: &str, value: &[u8], _ttl_seconds: u64) -> Result<()> {
            if self.fail_next {
                self.fail_next = false;
                return Err(CacheError::Backend("injected failure".to_string()).into());
            }
            self.store.insert(key.to_string(), value.to_vec());
            Ok(())
        }

        fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
            if self.fail_next {
                self.fail_next = false;
                return Err(CacheError::Backend("injected failure".to_string()).into());
            }
            Ok(self.store.get(key).cloned())
        }

        fn remove(&mut self, key: &str) -> Result<()> {
            self.store.remove(key);
            Ok(())
        }
    }
}

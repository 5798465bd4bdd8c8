//! Worked example of the cache client: memoize a downstream call by the
//! fingerprint of its arguments.
//!
//! Not part of the pool/worker core itself — this is what an application
//! built on top of it might do with the cache client and a bus session.

use std::time::Duration;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::bus::{BusClient, Message};
use crate::cache::{CacheBackend, CacheClient};
use crate::errors::{PreforkError, Result};

/// TTL for a memoized result.
const RESULT_TTL_SECONDS: i64 = 5 * 60;
/// How long to wait for the downstream call's single response.
const RECEIVE_DEADLINE: Duration = Duration::from_secs(60);

/// Hex-encoded SHA-256 fingerprint of the canonical JSON form of `value`.
pub fn fingerprint<T: Serialize>(value: &T) -> Result<String> {
    let bytes = serde_json::to_vec(value).map_err(|e| PreforkError::Other(e.into()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Call `method(args)` on `service` through `bus`, memoizing the result's
/// fingerprint in `cache` under a key derived from the arguments'
/// fingerprint.
///
/// Returns the result fingerprint, which is what the caller of *this*
/// method ultimately responds with — the cache stores and returns
/// fingerprints, never the raw result, so a cache hit never needs to
/// re-serialize a potentially large payload.
pub fn memoized_call<B, C, A>(
    bus: &mut B,
    cache: &CacheClient<C>,
    service: &str,
    method: &str,
    args: &A,
) -> Result<String>
where
    B: BusClient,
    C: CacheBackend,
    A: Serialize,
{
    let args_fp = fingerprint(args)?;
    let cache_key = format!("memoize:{service}:{method}:{args_fp}");
    if let Some(cached) = cache.get_string(&cache_key) {
        return Ok(String::from_utf8_lossy(&cached).into_owned());
    }

    let request_body = serde_json::to_vec(&(method, args)).map_err(|e| PreforkError::Other(e.into()))?;
    bus.send(&Message::data(service, request_body))?;

    let response = bus
        .recv_timeout(RECEIVE_DEADLINE)?
        .ok_or_else(|| PreforkError::Bus(format!("no response from {service} within {RECEIVE_DEADLINE:?}")))?;

    let result_fp = {
        let mut hasher = Sha256::new();
        hasher.update(&response.body);
        format!("{:x}", hasher.finalize())
    };

    cache.put_string(&cache_key, result_fp.as_bytes(), RESULT_TTL_SECONDS);
    Ok(result_fp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::fake::FakeBus;
    use crate::cache::fake::FakeBackend;

    #[test]
    fn fingerprint_is_deterministic() {
        let a = fingerprint(&("add", [1, 2])).unwrap();
        let b = fingerprint(&("add", [1, 2])).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_differs_for_different_args() {
        let a = fingerprint(&("add", [1, 2])).unwrap();
        let b = fingerprint(&("add", [1, 3])).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn cache_miss_calls_downstream_then_memoizes() {
        let mut bus = FakeBus::connect("caller").unwrap();
        bus.inbox.push_back(Message::data("caller", b"result-bytes".to_vec()));
        let cache = CacheClient::new(FakeBackend::default(), 300);

        let fp1 = memoized_call(&mut bus, &cache, "opensrf.math", "add", &(1, 2)).unwrap();
        assert_eq!(bus.sent.len(), 1);

        // Second call with the same args hits the cache; no further bus send.
        let fp2 = memoized_call(&mut bus, &cache, "opensrf.math", "add", &(1, 2)).unwrap();
        assert_eq!(fp1, fp2);
        assert_eq!(bus.sent.len(), 1);
    }

    #[test]
    fn no_response_within_deadline_is_a_bus_error() {
        let mut bus = FakeBus::connect("caller").unwrap();
        let cache = CacheClient::new(FakeBackend::default(), 300);
        let err = memoized_call(&mut bus, &cache, "opensrf.math", "add", &(1, 2)).unwrap_err();
        assert!(matches!(err, PreforkError::Bus(_)));
    }
}

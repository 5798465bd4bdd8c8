//! Cache key normalization and TTL clamping.
//!
//! Keys are stripped of whitespace and control bytes, then anything still
//! too long is replaced with a `shortened_<hex>` form so the backend never
//! sees an oversized key.

use sha2::{Digest, Sha256};

/// Maximum normalized key length before the `shortened_` fallback kicks in.
pub const MAX_KEY_LEN: usize = 250;

/// Normalize a cache key: strip ASCII whitespace and control bytes, then
/// replace the result with `shortened_<hex digest>` if it is still longer
/// than [`MAX_KEY_LEN`].
///
/// The digest is taken over the key as received, before stripping, per the
/// documented contract (see `DESIGN.md`) — not over the already-stripped
/// form.
pub fn normalize_key(key: &str) -> String {
    let clean: String = key.chars().filter(|c| !c.is_whitespace() && !c.is_control()).collect();
    if clean.len() <= MAX_KEY_LEN {
        return clean;
    }
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    format!("shortened_{:x}", digest)
}

/// Clamp a caller-supplied TTL to `(0, ceiling]`. A non-positive value
/// means "use the ceiling".
pub fn clamp_ttl(seconds: i64, ceiling: u64) -> u64 {
    if seconds <= 0 {
        ceiling
    } else {
        (seconds as u64).min(ceiling)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_whitespace_and_control_bytes() {
        assert_eq!(normalize_key("foo bar\tbaz\n"), "foobarbaz");
        assert_eq!(normalize_key("clean"), "clean");
    }

    #[test]
    fn short_key_is_idempotent() {
        let key = "session:12345";
        assert_eq!(normalize_key(key), normalize_key(&normalize_key(key)));
    }

    #[test]
    fn oversized_key_is_shortened_deterministically() {
        let long_key = "x".repeat(MAX_KEY_LEN + 1);
        let shortened = normalize_key(&long_key);
        assert!(shortened.starts_with("shortened_"));
        assert_eq!(shortened, normalize_key(&long_key));
        assert!(shortened.len() < long_key.len());
    }

    #[test]
    fn ttl_zero_or_negative_uses_ceiling() {
        assert_eq!(clamp_ttl(0, 300), 300);
        assert_eq!(clamp_ttl(-5, 300), 300);
    }

    #[test]
    fn ttl_within_ceiling_is_unchanged() {
        assert_eq!(clamp_ttl(60, 300), 60);
    }

    #[test]
    fn ttl_above_ceiling_is_clamped() {
        assert_eq!(clamp_ttl(5000, 300), 300);
    }
}

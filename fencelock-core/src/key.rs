//! Storage-key and fence-key derivation.

use crate::error::{CoreError, ErrorContext};
use crate::ident::UserKey;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use sha2::{Digest, Sha256};
use std::fmt;

/// Number of bytes of the SHA-256 digest that are kept before base64url
/// encoding.
const HASH_TRUNCATION_BYTES: usize = 16;

/// A backend-addressable identifier for a lock record, derived from
/// `(prefix, K)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The storage key of the monotonic fence counter associated with a lock
/// key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct FenceKey(String);

impl FenceKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn strip_trailing_colons(prefix: &str) -> &str {
    prefix.trim_end_matches(':')
}

/// Derive a storage key from `(prefix, key)`, hash-truncating when the
/// verbatim concatenation would not fit within `limit - reserve` bytes.
pub fn make_storage_key(
    prefix: &str,
    key: &UserKey,
    limit: usize,
    reserve: usize,
) -> Result<StorageKey, CoreError> {
    derive_storage_key(prefix, key.as_str(), limit, reserve)
}

/// The raw-string form of [`make_storage_key`]'s algorithm (spec.md §4.2,
/// steps 1-6), shared with [`make_fence_key`]. Operates on a plain `&str`
/// rather than a [`UserKey`] because the fence key's intermediate input
/// (`"fence:" + S`) is internal storage-key material, not a caller-supplied
/// key, and must not be subjected to `UserKey`'s length cap or Unicode
/// normalization.
fn derive_storage_key(
    prefix: &str,
    key_str: &str,
    limit: usize,
    reserve: usize,
) -> Result<StorageKey, CoreError> {
    let prefix = strip_trailing_colons(prefix);
    if key_str.is_empty() {
        return Err(CoreError::invalid_argument_with(
            "user key must not be empty",
            ErrorContext::new(),
        ));
    }

    let prefix_bytes = prefix.len();
    let sep = if prefix.is_empty() { 0 } else { 1 };

    if prefix_bytes + sep + reserve > limit {
        return Err(CoreError::invalid_argument_with(
            format!(
                "prefix ({prefix_bytes} bytes) plus reserve ({reserve} bytes) already exceeds \
                 the storage key limit ({limit} bytes); no key for this prefix can ever fit"
            ),
            ErrorContext::new(),
        ));
    }

    let unhashed = if prefix.is_empty() {
        key_str.to_string()
    } else {
        format!("{prefix}:{key_str}")
    };

    let candidate = if unhashed.len() + reserve <= limit {
        unhashed
    } else {
        let digest = Sha256::digest(unhashed.as_bytes());
        let truncated = &digest[..HASH_TRUNCATION_BYTES];
        let encoded = URL_SAFE_NO_PAD.encode(truncated);
        if prefix.is_empty() {
            encoded
        } else {
            format!("{prefix}:{encoded}")
        }
    };

    if candidate.len() + reserve > limit {
        return Err(CoreError::invalid_argument_with(
            format!(
                "derived storage key ({} bytes) plus reserve ({reserve} bytes) still exceeds \
                 the limit ({limit} bytes)",
                candidate.len()
            ),
            ErrorContext::new(),
        ));
    }

    Ok(StorageKey(candidate))
}

/// Derive the fence key for a user key by applying [`make_storage_key`]
/// twice: once to get the storage key `S`, and again over `"fence:" + S`.
/// This guarantees a 1-to-1 mapping between user keys and fence counters
/// even when `S` itself was produced by hash truncation.
pub fn make_fence_key(
    prefix: &str,
    key: &UserKey,
    limit: usize,
    reserve: usize,
) -> Result<FenceKey, CoreError> {
    let storage_key = make_storage_key(prefix, key, limit, reserve)?;
    let fence_input = format!("fence:{storage_key}");
    let derived = derive_storage_key(prefix, &fence_input, limit, reserve)?;
    Ok(FenceKey(derived.into_string()))
}

impl StorageKey {
    fn into_string(self) -> String {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> UserKey {
        UserKey::parse(s).unwrap()
    }

    #[test]
    fn short_key_is_verbatim_concatenation() {
        let sk = make_storage_key("lock", &key("x"), 200, 10).unwrap();
        assert_eq!(sk.as_str(), "lock:x");
    }

    #[test]
    fn empty_prefix_has_no_separator() {
        let sk = make_storage_key("", &key("x"), 200, 10).unwrap();
        assert_eq!(sk.as_str(), "x");
    }

    #[test]
    fn trailing_colons_in_prefix_are_stripped() {
        let a = make_storage_key("lock:::", &key("x"), 200, 10).unwrap();
        let b = make_storage_key("lock", &key("x"), 200, 10).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn long_key_is_hash_truncated() {
        let long_key = key(&"y".repeat(300));
        let sk = make_storage_key("lock", &long_key, 64, 4).unwrap();
        assert!(sk.as_str().len() + 4 <= 64);
        assert!(sk.as_str().starts_with("lock:"));
        // 5 for "lock:" + 22 for the base64url(16 bytes) hash
        assert_eq!(sk.as_str().len(), 5 + 22);
    }

    #[test]
    fn hash_over_prefixed_string_avoids_cross_prefix_collision() {
        let long_key = key(&"z".repeat(300));
        let a = make_storage_key("alpha", &long_key, 64, 4).unwrap();
        let b = make_storage_key("beta", &long_key, 64, 4).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn deterministic_for_identical_inputs() {
        let long_key = key(&"w".repeat(300));
        let a = make_storage_key("lock", &long_key, 64, 4).unwrap();
        let b = make_storage_key("lock", &long_key, 64, 4).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn prefix_plus_reserve_over_limit_fails_fast() {
        let result = make_storage_key("a-very-long-prefix-indeed", &key("x"), 10, 5);
        assert!(result.is_err());
    }

    #[test]
    fn fence_key_differs_from_storage_key() {
        let k = key("resource-1");
        let sk = make_storage_key("lock", &k, 200, 10).unwrap();
        let fk = make_fence_key("lock", &k, 200, 10).unwrap();
        assert_ne!(sk.as_str(), fk.as_str());
        assert!(fk.as_str().starts_with("lock:"));
    }

    #[test]
    fn fence_key_is_one_to_one_under_truncation() {
        // Two distinct keys that hash-truncate to the same storage key
        // length bucket must still map to distinct fence keys, because the
        // fence key is derived from the (already-unique) storage key, not
        // from the raw user key.
        let k1 = key(&"p".repeat(300));
        let k2 = key(&"q".repeat(300));
        let f1 = make_fence_key("lock", &k1, 64, 4).unwrap();
        let f2 = make_fence_key("lock", &k2, 64, 4).unwrap();
        assert_ne!(f1.as_str(), f2.as_str());
    }

    #[test]
    fn fence_key_succeeds_when_storage_key_exceeds_user_key_byte_cap() {
        // A backend with a large indexed-key limit can legitimately produce
        // a verbatim storage key S longer than UserKey::MAX_USER_KEY_BYTES
        // (512). "fence:" + S must still derive without hitting that cap,
        // since it is internal storage-key material, not a caller-supplied
        // key.
        let k = key(&"r".repeat(600));
        let limit = 4096;
        let sk = make_storage_key("lock", &k, limit, 32).unwrap();
        assert!(sk.as_str().len() > 512);
        let fk = make_fence_key("lock", &k, limit, 32).unwrap();
        assert!(fk.as_str().starts_with("lock:"));
    }
}

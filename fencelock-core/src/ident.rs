//! User key normalization/validation, lock id generation, and the
//! non-cryptographic key hash used for telemetry/sanitized output.

use crate::error::{CoreError, ErrorContext};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use once_cell::sync::Lazy;
use rand::RngCore;
use regex::Regex;
use std::fmt;
use unicode_normalization::UnicodeNormalization;

/// Length in bytes of the CSPRNG material backing a [`LockId`], and the
/// resulting base64url-without-padding string length.
pub const LOCK_ID_BYTES: usize = 16;
pub const LOCK_ID_LEN: usize = 22;

/// Maximum permitted UTF-8 byte length of a user key.
pub const MAX_USER_KEY_BYTES: usize = 512;

static LOCK_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{22}$").expect("static lock id regex is valid"));

/// A caller-provided resource identifier, normalized to canonical composed
/// Unicode form and validated for non-emptiness and length before any I/O.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct UserKey(String);

impl UserKey {
    /// Normalize and validate a raw caller-supplied key.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let normalized: String = raw.nfc().collect();
        if normalized.is_empty() {
            return Err(CoreError::invalid_argument_with(
                "user key must not be empty",
                ErrorContext::new(),
            ));
        }
        if normalized.len() > MAX_USER_KEY_BYTES {
            return Err(CoreError::invalid_argument_with(
                format!(
                    "user key exceeds {MAX_USER_KEY_BYTES} UTF-8 bytes (got {})",
                    normalized.len()
                ),
                ErrorContext::new(),
            ));
        }
        Ok(UserKey(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 22-character base64url lock identifier produced from 16 CSPRNG bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct LockId(String);

impl LockId {
    /// Generate a fresh, cryptographically random lock id.
    pub fn generate() -> Result<Self, CoreError> {
        let mut bytes = [0u8; LOCK_ID_BYTES];
        rand::rngs::OsRng.try_fill_bytes(&mut bytes).map_err(|e| {
            CoreError::Internal {
                context: ErrorContext::new(),
                cause: Some(Box::new(e)),
            }
        })?;
        let encoded = URL_SAFE_NO_PAD.encode(bytes);
        debug_assert_eq!(encoded.len(), LOCK_ID_LEN);
        Ok(LockId(encoded))
    }

    /// Validate the strict `^[A-Za-z0-9_-]{22}$` format and wrap it.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        if validate_lock_id_format(raw) {
            Ok(LockId(raw.to_string()))
        } else {
            Err(CoreError::invalid_argument_with(
                "lock id does not match the required 22-character base64url format",
                ErrorContext::new().with_lock_id(raw),
            ))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Strict format check shared by [`LockId::parse`] and any caller that wants
/// to pre-validate without constructing the newtype.
pub fn validate_lock_id_format(raw: &str) -> bool {
    LOCK_ID_PATTERN.is_match(raw)
}

/// Deterministic, non-cryptographic 96-bit hash rendered as 24 lowercase hex
/// characters. Used only for telemetry identifiers and sanitized lookup
/// output — explicitly not a security boundary.
///
/// Implemented as three independently-seeded FNV-1a-style mixes over the
/// input bytes, folded down to 32 bits each for 96 bits total.
pub fn hash_key(value: &str) -> String {
    const SEEDS: [u64; 3] = [
        0xcbf29ce484222325,
        0x9e3779b97f4a7c15,
        0x517cc1b727220a95,
    ];
    const FNV_PRIME: u64 = 0x100000001b3;

    let mut out = [0u8; 12];
    for (chunk_idx, seed) in SEEDS.iter().enumerate() {
        let mut hash = *seed;
        for byte in value.as_bytes() {
            hash ^= *byte as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        // Fold each 64-bit mix down to 4 bytes, giving 3 * 32 = 96 bits total.
        let folded = (hash ^ (hash >> 32)) as u32;
        out[chunk_idx * 4..chunk_idx * 4 + 4].copy_from_slice(&folded.to_be_bytes());
    }
    hex::encode(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_key_rejects_empty() {
        assert!(UserKey::parse("").is_err());
    }

    #[test]
    fn user_key_accepts_512_bytes() {
        let key = "a".repeat(512);
        assert!(UserKey::parse(&key).is_ok());
    }

    #[test]
    fn user_key_rejects_513_bytes() {
        let key = "a".repeat(513);
        assert!(UserKey::parse(&key).is_err());
    }

    #[test]
    fn lock_id_generate_has_valid_format() {
        let id = LockId::generate().unwrap();
        assert_eq!(id.as_str().len(), LOCK_ID_LEN);
        assert!(validate_lock_id_format(id.as_str()));
    }

    #[test]
    fn lock_id_generate_is_not_constant() {
        let a = LockId::generate().unwrap();
        let b = LockId::generate().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn lock_id_parse_rejects_bad_format() {
        assert!(LockId::parse("too-short").is_err());
        assert!(LockId::parse(&"x".repeat(23)).is_err());
        assert!(LockId::parse("!!!!!!!!!!!!!!!!!!!!!!").is_err());
    }

    #[test]
    fn hash_key_is_deterministic() {
        assert_eq!(hash_key("resource:x"), hash_key("resource:x"));
    }

    #[test]
    fn hash_key_is_24_hex_chars() {
        let h = hash_key("anything");
        assert_eq!(h.len(), 24);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()));
    }

    #[test]
    fn hash_key_differs_for_different_inputs() {
        assert_ne!(hash_key("a"), hash_key("b"));
    }
}

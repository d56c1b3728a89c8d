//! Persisted object shapes.

use crate::fence::FenceToken;
use crate::ident::{LockId, UserKey};
use crate::key::StorageKey;
use serde::{Deserialize, Serialize};

/// The persisted object for an active lock. Every record carries a
/// backend-enforced TTL aligned with `expires_at_ms` so that forgotten
/// locks are reclaimed by the storage itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRecord {
    pub storage_key: StorageKey,
    pub lock_id: LockId,
    pub acquired_at_ms: i64,
    pub expires_at_ms: i64,
    /// Present only when the backend's capability descriptor declares
    /// fencing support.
    pub fence: Option<FenceToken>,
    pub key: UserKey,
}

impl LockRecord {
    pub fn is_live(&self, now_ms: i64, tolerance_ms: i64) -> bool {
        crate::liveness::is_live(self.expires_at_ms, now_ms, tolerance_ms)
    }
}

/// Secondary addressable object mapping a lock id back to its storage key,
/// maintained with the same TTL as the main record. The main record and
/// its reverse-index entry are created and deleted together; neither is
/// observable without the other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReverseIndexEntry {
    pub lock_id: LockId,
    pub storage_key: StorageKey,
    pub expires_at_ms: i64,
}

/// A persisted, never-deleted counter keyed by a [`crate::FenceKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FenceCounterRecord {
    pub value: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::make_storage_key;

    #[test]
    fn lock_record_liveness_delegates_to_predicate() {
        let key = UserKey::parse("x").unwrap();
        let storage_key = make_storage_key("p", &key, 200, 10).unwrap();
        let record = LockRecord {
            storage_key,
            lock_id: LockId::generate().unwrap(),
            acquired_at_ms: 0,
            expires_at_ms: 5_000,
            fence: Some(FenceToken::ZERO),
            key,
        };
        assert!(record.is_live(4_000, 1_000));
        assert!(!record.is_live(6_001, 1_000));
    }
}

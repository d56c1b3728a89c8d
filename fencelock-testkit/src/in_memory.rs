//! An in-memory, single-mutex reference implementation of [`LockBackend`].
//!
//! The single `tokio::sync::Mutex` guarding all state stands in for "one
//! Lua script" or "one SQL transaction": every operation below runs to
//! completion without interleaving with any other operation on this
//! backend, which is exactly the end-to-end atomicity a real adapter must
//! provide. This is a test double, not a production backend — it has no
//! TTL-driven background reaper and holds everything in process memory.

use async_trait::async_trait;
use fencelock_backend::{
    AcquireOutcome, BackendCapabilities, CancellationToken, LockBackend, LookupQuery,
    LookupResult, MutationResult, SanitizedLockInfo, TimeAuthority,
};
use fencelock_core::{
    hash_key, is_live, make_fence_key, make_storage_key, Clock, CoreError, FenceCounterRecord,
    FenceToken, LockId, LockRecord, SystemClock, UserKey, TIME_TOLERANCE_MS,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Guard beyond the liveness tolerance before `is_locked` opportunistically
/// reclaims a record observed well past its expiry.
const CLEANUP_GUARD_MS: i64 = 2_000;

#[derive(Default)]
struct State {
    records: HashMap<String, LockRecord>,
    reverse: HashMap<String, String>,
    fences: HashMap<String, FenceCounterRecord>,
}

pub struct InMemoryBackend {
    prefix: String,
    limit: usize,
    reserve: usize,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl InMemoryBackend {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self::with_clock(prefix, Arc::new(SystemClock))
    }

    pub fn with_clock(prefix: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        InMemoryBackend {
            prefix: prefix.into(),
            limit: 512,
            reserve: 32,
            clock,
            state: Mutex::new(State::default()),
        }
    }

    fn check_cancelled(cancellation: Option<&CancellationToken>) -> Result<(), CoreError> {
        if cancellation.map(|t| t.is_cancelled()).unwrap_or(false) {
            return Err(CoreError::aborted());
        }
        Ok(())
    }

    fn validate_ttl(ttl_ms: i64) -> Result<(), CoreError> {
        if ttl_ms <= 0 {
            return Err(CoreError::invalid_argument(
                "ttlMs must be a positive integer",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl LockBackend for InMemoryBackend {
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            supports_fencing: true,
            time_authority: TimeAuthority::Server,
        }
    }

    async fn acquire(
        &self,
        key: &UserKey,
        ttl_ms: i64,
        cancellation: Option<&CancellationToken>,
    ) -> Result<AcquireOutcome, CoreError> {
        Self::check_cancelled(cancellation)?;
        Self::validate_ttl(ttl_ms)?;
        let storage_key = make_storage_key(&self.prefix, key, self.limit, self.reserve)?;
        let fence_key = make_fence_key(&self.prefix, key, self.limit, self.reserve)?;
        let now = self.clock.now_ms();

        let mut state = self.state.lock().await;
        if let Some(existing) = state.records.get(storage_key.as_str()) {
            if existing.is_live(now, TIME_TOLERANCE_MS) {
                return Ok(AcquireOutcome::Locked);
            }
        }

        let current_value = state
            .fences
            .get(fence_key.as_str())
            .map(|c| c.value)
            .unwrap_or(0);
        let fence = FenceToken::new(current_value + 1)?;
        if fence.is_near_capacity() {
            tracing::warn!(
                key_hash = %hash_key(key.as_str()),
                fence = %fence,
                "fence counter has crossed the operator-visible capacity warning threshold"
            );
        }
        state.fences.insert(
            fence_key.as_str().to_string(),
            FenceCounterRecord { value: fence.value() },
        );

        let lock_id = LockId::generate()?;
        let expires_at_ms = now + ttl_ms;
        let record = LockRecord {
            storage_key: storage_key.clone(),
            lock_id: lock_id.clone(),
            acquired_at_ms: now,
            expires_at_ms,
            fence: Some(fence),
            key: key.clone(),
        };

        state
            .reverse
            .insert(lock_id.as_str().to_string(), storage_key.as_str().to_string());
        state
            .records
            .insert(storage_key.as_str().to_string(), record);

        Ok(AcquireOutcome::Acquired {
            lock_id,
            expires_at_ms,
            fence: Some(fence),
        })
    }

    async fn release(
        &self,
        lock_id: &LockId,
        cancellation: Option<&CancellationToken>,
    ) -> Result<MutationResult, CoreError> {
        Self::check_cancelled(cancellation)?;
        let now = self.clock.now_ms();
        let mut state = self.state.lock().await;

        let Some(storage_key) = state.reverse.get(lock_id.as_str()).cloned() else {
            return Ok(MutationResult::failure(
                fencelock_core::MutationOutcome::NeverExisted,
            ));
        };

        let Some(record) = state.records.get(&storage_key) else {
            state.reverse.remove(lock_id.as_str());
            return Ok(MutationResult::failure(
                fencelock_core::MutationOutcome::NeverExisted,
            ));
        };

        if record.lock_id != *lock_id {
            state.reverse.remove(lock_id.as_str());
            return Ok(MutationResult::failure(
                fencelock_core::MutationOutcome::OwnershipMismatch,
            ));
        }

        if !record.is_live(now, TIME_TOLERANCE_MS) {
            state.records.remove(&storage_key);
            state.reverse.remove(lock_id.as_str());
            return Ok(MutationResult::failure(
                fencelock_core::MutationOutcome::ObservableExpired,
            ));
        }

        state.records.remove(&storage_key);
        state.reverse.remove(lock_id.as_str());
        Ok(MutationResult::success(None))
    }

    async fn extend(
        &self,
        lock_id: &LockId,
        ttl_ms: i64,
        cancellation: Option<&CancellationToken>,
    ) -> Result<MutationResult, CoreError> {
        Self::check_cancelled(cancellation)?;
        Self::validate_ttl(ttl_ms)?;
        let now = self.clock.now_ms();
        let mut state = self.state.lock().await;

        let Some(storage_key) = state.reverse.get(lock_id.as_str()).cloned() else {
            return Ok(MutationResult::failure(
                fencelock_core::MutationOutcome::NeverExisted,
            ));
        };

        let is_owner_live = {
            let Some(record) = state.records.get(&storage_key) else {
                state.reverse.remove(lock_id.as_str());
                return Ok(MutationResult::failure(
                    fencelock_core::MutationOutcome::NeverExisted,
                ));
            };
            if record.lock_id != *lock_id {
                state.reverse.remove(lock_id.as_str());
                return Ok(MutationResult::failure(
                    fencelock_core::MutationOutcome::OwnershipMismatch,
                ));
            }
            record.is_live(now, TIME_TOLERANCE_MS)
        };

        if !is_owner_live {
            return Ok(MutationResult::failure(
                fencelock_core::MutationOutcome::ObservableExpired,
            ));
        }

        let new_expiry = now + ttl_ms;
        if let Some(record) = state.records.get_mut(&storage_key) {
            record.expires_at_ms = new_expiry;
        }
        Ok(MutationResult::success(Some(new_expiry)))
    }

    async fn is_locked(
        &self,
        key: &UserKey,
        cancellation: Option<&CancellationToken>,
    ) -> Result<bool, CoreError> {
        Self::check_cancelled(cancellation)?;
        let storage_key = make_storage_key(&self.prefix, key, self.limit, self.reserve)?;
        let now = self.clock.now_ms();
        let mut state = self.state.lock().await;

        let Some(record) = state.records.get(storage_key.as_str()) else {
            return Ok(false);
        };

        if is_live(record.expires_at_ms, now, TIME_TOLERANCE_MS) {
            return Ok(true);
        }

        if record.expires_at_ms <= now - TIME_TOLERANCE_MS - CLEANUP_GUARD_MS {
            let lock_id = record.lock_id.as_str().to_string();
            state.records.remove(storage_key.as_str());
            state.reverse.remove(&lock_id);
        }
        Ok(false)
    }

    async fn lookup(
        &self,
        query: LookupQuery,
        cancellation: Option<&CancellationToken>,
    ) -> Result<LookupResult, CoreError> {
        Self::check_cancelled(cancellation)?;
        let now = self.clock.now_ms();
        let state = self.state.lock().await;

        let record = match query {
            LookupQuery::ByKey(key) => {
                let storage_key = make_storage_key(&self.prefix, &key, self.limit, self.reserve)?;
                state.records.get(storage_key.as_str()).cloned()
            }
            LookupQuery::ByLockId(lock_id) => {
                let storage_key = state.reverse.get(lock_id.as_str()).cloned();
                storage_key.and_then(|sk| {
                    state.records.get(&sk).filter(|r| r.lock_id == lock_id).cloned()
                })
            }
        };

        let Some(record) = record else {
            return Ok(None);
        };
        if !record.is_live(now, TIME_TOLERANCE_MS) {
            return Ok(None);
        }

        Ok(Some(SanitizedLockInfo {
            key_hash: hash_key(record.key.as_str()),
            lock_id_hash: hash_key(record.lock_id.as_str()),
            expires_at_ms: record.expires_at_ms,
            acquired_at_ms: record.acquired_at_ms,
            fence: record.fence,
        }))
    }
}

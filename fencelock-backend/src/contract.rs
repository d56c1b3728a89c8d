//! The five-operation backend contract.

use crate::cancellation::CancellationToken;
use async_trait::async_trait;
use fencelock_core::{CoreError, FenceToken, LockId, MutationOutcome, UserKey};
use serde::{Deserialize, Serialize};

/// Which side owns the clock used to compute `expires_at_ms` on acquire/
/// extend: the storage's own clock, or the caller's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeAuthority {
    Server,
    Client,
}

/// Compile-time-ish capability descriptor a backend declares. Modeled as a
/// value returned from a trait method rather than a generic type
/// parameter so a single adapter type can report its fixed capabilities
/// without callers having to thread an extra type parameter through every
/// call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    pub supports_fencing: bool,
    pub time_authority: TimeAuthority,
}

/// The outcome of a successful or contended `acquire` call. Contention is a
/// result, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired {
        lock_id: LockId,
        expires_at_ms: i64,
        fence: Option<FenceToken>,
    },
    Locked,
}

/// The outcome of `release`/`extend`. The hidden [`MutationOutcome`] is
/// what the telemetry decorator observes; the public shape exposes only
/// `ok` (and, for extend, the new expiry).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationResult {
    pub ok: bool,
    pub expires_at_ms: Option<i64>,
    pub outcome: MutationOutcome,
}

impl MutationResult {
    pub fn success(expires_at_ms: Option<i64>) -> Self {
        MutationResult {
            ok: true,
            expires_at_ms,
            outcome: MutationOutcome::Succeeded,
        }
    }

    pub fn failure(outcome: MutationOutcome) -> Self {
        debug_assert!(!outcome.is_ok());
        MutationResult {
            ok: false,
            expires_at_ms: None,
            outcome,
        }
    }
}

/// A lookup query is either by user key or by lock id.
#[derive(Debug, Clone)]
pub enum LookupQuery {
    ByKey(UserKey),
    ByLockId(LockId),
}

/// Sanitized lookup output: identifiers are hashes only. Raw values are
/// carried only by a separate debug variant a backend adapter may choose to
/// expose internally; this crate does not define one, since raw-value
/// lookup is not part of the common contract surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanitizedLockInfo {
    pub key_hash: String,
    pub lock_id_hash: String,
    pub expires_at_ms: i64,
    pub acquired_at_ms: i64,
    pub fence: Option<FenceToken>,
}

pub type LookupResult = Option<SanitizedLockInfo>;

/// The storage-agnostic contract every backend adapter implements.
///
/// Every mutating operation (`acquire`, `release`, `extend`) must be atomic
/// end-to-end with respect to concurrent callers on the same storage key.
/// Implementations accept an optional
/// [`CancellationToken`] and must check it at the start of the operation,
/// and again around suspension points where feasible.
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// This backend's fixed capability descriptor.
    fn capabilities(&self) -> BackendCapabilities;

    /// Attempt to acquire `key` for `ttl_ms` milliseconds. Atomic
    /// read-or-create: if the record at the derived storage key is absent
    /// or not live, creates a fresh record with a new lock id and
    /// (if fencing is supported) a new fence token, and returns the new
    /// expiry. If the record is live, returns [`AcquireOutcome::Locked`].
    async fn acquire(
        &self,
        key: &UserKey,
        ttl_ms: i64,
        cancellation: Option<&CancellationToken>,
    ) -> Result<AcquireOutcome, CoreError>;

    /// Release the lock identified by `lock_id`. Atomic: resolve lock id to
    /// storage key via the reverse index, verify ownership and liveness,
    /// then delete both. Never deletes a record owned by someone else.
    async fn release(
        &self,
        lock_id: &LockId,
        cancellation: Option<&CancellationToken>,
    ) -> Result<MutationResult, CoreError>;

    /// Extend the lock identified by `lock_id` to `now + ttl_ms`,
    /// replacing (not adding to) the current expiry. Same ownership-
    /// verified, atomic pattern as `release`.
    async fn extend(
        &self,
        lock_id: &LockId,
        ttl_ms: i64,
        cancellation: Option<&CancellationToken>,
    ) -> Result<MutationResult, CoreError>;

    /// `true` iff `key` currently has a live lock record. May opportunistically
    /// clean up a record observed well past its expiry, but must never
    /// touch the fence counter.
    async fn is_locked(
        &self,
        key: &UserKey,
        cancellation: Option<&CancellationToken>,
    ) -> Result<bool, CoreError>;

    /// Resolve a lookup query to a sanitized [`SanitizedLockInfo`], or
    /// `None` if no live record matches.
    async fn lookup(
        &self,
        query: LookupQuery,
        cancellation: Option<&CancellationToken>,
    ) -> Result<LookupResult, CoreError>;
}

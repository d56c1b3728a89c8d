//! fencelock - scoped lock handles and a retry/backoff acquisition
//! orchestrator over a pluggable [`LockBackend`].
//!
//! This is the crate most callers depend on directly; it re-exports the
//! pieces of `fencelock-core` and `fencelock-backend` needed to use it
//! without pulling in either crate by name.

mod handle;
mod orchestrator;

pub use fencelock_backend::{
    AcquireOutcome, BackendCapabilities, CancellationToken, LockBackend, LookupQuery,
    LookupResult, MutationResult, SanitizedLockInfo, TelemetryBackend, TelemetryEvent,
    TelemetryOperation, TelemetryOptions, TimeAuthority,
};
pub use fencelock_core::{
    hash_key, is_live, make_fence_key, make_storage_key, CoreError, ErrorContext, FenceKey,
    FenceToken, LockId, LockRecord, MutationOutcome, MutationReason, StorageKey,
    TIME_TOLERANCE_MS, UserKey,
};

pub use handle::{LockHandle, ScopeHandleOptions};
pub use orchestrator::{
    acquire_with_retry, acquire_with_retry_cancellable, run_with_lock, AcquisitionOptions,
    BackoffStrategy, Jitter,
};

//! Telemetry decorator.
//!
//! Wraps any [`LockBackend`] with a pass-through that emits one sanitized
//! event per operation. The wrapped backend knows nothing about events;
//! this is composition, not inheritance.

use crate::cancellation::CancellationToken;
use crate::contract::{
    AcquireOutcome, BackendCapabilities, LockBackend, LookupQuery, LookupResult, MutationResult,
};
use async_trait::async_trait;
use fencelock_core::{hash_key, CoreError, MutationReason, UserKey};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Which operation a [`TelemetryEvent`] reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryOperation {
    Acquire,
    Release,
    Extend,
    IsLocked,
    Lookup,
}

impl TelemetryOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            TelemetryOperation::Acquire => "acquire",
            TelemetryOperation::Release => "release",
            TelemetryOperation::Extend => "extend",
            TelemetryOperation::IsLocked => "isLocked",
            TelemetryOperation::Lookup => "lookup",
        }
    }
}

/// One telemetry event per backend call.
#[derive(Debug, Clone)]
pub struct TelemetryEvent {
    pub operation: TelemetryOperation,
    pub key_hash: Option<String>,
    pub lock_id_hash: Option<String>,
    pub ok: bool,
    pub reason: Option<MutationReason>,
    pub raw_key: Option<String>,
    pub raw_lock_id: Option<String>,
}

/// Controls whether raw identifiers are attached to events: always, never,
/// or gated behind a caller-supplied predicate.
pub enum IncludeRaw {
    Always,
    Never,
    Predicate(Box<dyn Fn(&TelemetryEvent) -> bool + Send + Sync>),
}

impl IncludeRaw {
    /// Evaluate whether raw identifiers should be attached to `event`.
    /// Predicate panics are treated as `false` — fail-safe redact.
    fn evaluate(&self, event: &TelemetryEvent) -> bool {
        match self {
            IncludeRaw::Always => true,
            IncludeRaw::Never => false,
            IncludeRaw::Predicate(predicate) => {
                std::panic::catch_unwind(AssertUnwindSafe(|| predicate(event))).unwrap_or_else(|_| {
                    tracing::warn!(
                        operation = event.operation.as_str(),
                        "include_raw predicate panicked; redacting raw identifiers"
                    );
                    false
                })
            }
        }
    }
}

/// Configuration for [`TelemetryBackend`].
pub struct TelemetryOptions {
    pub on_event: Box<dyn Fn(TelemetryEvent) + Send + Sync>,
    pub include_raw: IncludeRaw,
}

impl TelemetryOptions {
    pub fn new(on_event: impl Fn(TelemetryEvent) + Send + Sync + 'static) -> Self {
        TelemetryOptions {
            on_event: Box::new(on_event),
            include_raw: IncludeRaw::Never,
        }
    }

    pub fn with_include_raw(mut self, include_raw: IncludeRaw) -> Self {
        self.include_raw = include_raw;
        self
    }

    /// Emit an event. Sink panics/unwinds are swallowed: telemetry must
    /// never affect lock operations.
    fn emit(&self, mut event: TelemetryEvent) {
        if !self.include_raw.evaluate(&event) {
            event.raw_key = None;
            event.raw_lock_id = None;
        }
        let operation = event.operation;
        if std::panic::catch_unwind(AssertUnwindSafe(|| (self.on_event)(event))).is_err() {
            tracing::warn!(
                operation = operation.as_str(),
                "telemetry sink panicked; event dropped"
            );
        }
    }
}

/// Wraps a [`LockBackend`] so every call also emits a [`TelemetryEvent`].
/// Results passed through to the caller are identical to the wrapped
/// backend's; telemetry observes, it never mutates.
pub struct TelemetryBackend<B> {
    inner: Arc<B>,
    options: TelemetryOptions,
}

impl<B: LockBackend> TelemetryBackend<B> {
    pub fn new(inner: Arc<B>, options: TelemetryOptions) -> Self {
        TelemetryBackend { inner, options }
    }
}

#[async_trait]
impl<B: LockBackend> LockBackend for TelemetryBackend<B> {
    fn capabilities(&self) -> BackendCapabilities {
        self.inner.capabilities()
    }

    async fn acquire(
        &self,
        key: &UserKey,
        ttl_ms: i64,
        cancellation: Option<&CancellationToken>,
    ) -> Result<AcquireOutcome, CoreError> {
        let result = self.inner.acquire(key, ttl_ms, cancellation).await;
        if let Ok(outcome) = &result {
            let (ok, reason) = match outcome {
                AcquireOutcome::Acquired { .. } => (true, None),
                AcquireOutcome::Locked => (false, Some(MutationReason::Locked)),
            };
            self.options.emit(TelemetryEvent {
                operation: TelemetryOperation::Acquire,
                key_hash: Some(hash_key(key.as_str())),
                lock_id_hash: None,
                ok,
                reason,
                raw_key: Some(key.as_str().to_string()),
                raw_lock_id: None,
            });
        }
        result
    }

    async fn release(
        &self,
        lock_id: &fencelock_core::LockId,
        cancellation: Option<&CancellationToken>,
    ) -> Result<MutationResult, CoreError> {
        let result = self.inner.release(lock_id, cancellation).await;
        if let Ok(mutation) = &result {
            self.options.emit(TelemetryEvent {
                operation: TelemetryOperation::Release,
                key_hash: None,
                lock_id_hash: Some(hash_key(lock_id.as_str())),
                ok: mutation.ok,
                reason: mutation.outcome.reason(),
                raw_key: None,
                raw_lock_id: Some(lock_id.as_str().to_string()),
            });
        }
        result
    }

    async fn extend(
        &self,
        lock_id: &fencelock_core::LockId,
        ttl_ms: i64,
        cancellation: Option<&CancellationToken>,
    ) -> Result<MutationResult, CoreError> {
        let result = self.inner.extend(lock_id, ttl_ms, cancellation).await;
        if let Ok(mutation) = &result {
            self.options.emit(TelemetryEvent {
                operation: TelemetryOperation::Extend,
                key_hash: None,
                lock_id_hash: Some(hash_key(lock_id.as_str())),
                ok: mutation.ok,
                reason: mutation.outcome.reason(),
                raw_key: None,
                raw_lock_id: Some(lock_id.as_str().to_string()),
            });
        }
        result
    }

    async fn is_locked(
        &self,
        key: &UserKey,
        cancellation: Option<&CancellationToken>,
    ) -> Result<bool, CoreError> {
        let result = self.inner.is_locked(key, cancellation).await;
        if let Ok(locked) = &result {
            self.options.emit(TelemetryEvent {
                operation: TelemetryOperation::IsLocked,
                key_hash: Some(hash_key(key.as_str())),
                lock_id_hash: None,
                ok: *locked,
                reason: None,
                raw_key: Some(key.as_str().to_string()),
                raw_lock_id: None,
            });
        }
        result
    }

    async fn lookup(
        &self,
        query: LookupQuery,
        cancellation: Option<&CancellationToken>,
    ) -> Result<LookupResult, CoreError> {
        let (key_hash, lock_id_hash, raw_key, raw_lock_id) = match &query {
            LookupQuery::ByKey(key) => (
                Some(hash_key(key.as_str())),
                None,
                Some(key.as_str().to_string()),
                None,
            ),
            LookupQuery::ByLockId(lock_id) => (
                None,
                Some(hash_key(lock_id.as_str())),
                None,
                Some(lock_id.as_str().to_string()),
            ),
        };
        let result = self.inner.lookup(query, cancellation).await;
        if let Ok(found) = &result {
            self.options.emit(TelemetryEvent {
                operation: TelemetryOperation::Lookup,
                key_hash,
                lock_id_hash,
                ok: found.is_some(),
                reason: if found.is_some() {
                    None
                } else {
                    Some(MutationReason::NotFound)
                },
                raw_key,
                raw_lock_id,
            });
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{MutationResult, SanitizedLockInfo};
    use fencelock_core::{LockId, MutationOutcome};
    use std::sync::Mutex;

    struct StubBackend;

    #[async_trait]
    impl LockBackend for StubBackend {
        fn capabilities(&self) -> BackendCapabilities {
            BackendCapabilities {
                supports_fencing: true,
                time_authority: crate::contract::TimeAuthority::Server,
            }
        }

        async fn acquire(
            &self,
            _key: &UserKey,
            _ttl_ms: i64,
            _cancellation: Option<&CancellationToken>,
        ) -> Result<AcquireOutcome, CoreError> {
            Ok(AcquireOutcome::Locked)
        }

        async fn release(
            &self,
            _lock_id: &LockId,
            _cancellation: Option<&CancellationToken>,
        ) -> Result<MutationResult, CoreError> {
            Ok(MutationResult::failure(MutationOutcome::NeverExisted))
        }

        async fn extend(
            &self,
            _lock_id: &LockId,
            _ttl_ms: i64,
            _cancellation: Option<&CancellationToken>,
        ) -> Result<MutationResult, CoreError> {
            Ok(MutationResult::success(Some(1)))
        }

        async fn is_locked(
            &self,
            _key: &UserKey,
            _cancellation: Option<&CancellationToken>,
        ) -> Result<bool, CoreError> {
            Ok(false)
        }

        async fn lookup(
            &self,
            _query: LookupQuery,
            _cancellation: Option<&CancellationToken>,
        ) -> Result<LookupResult, CoreError> {
            Ok(Some(SanitizedLockInfo {
                key_hash: "h".into(),
                lock_id_hash: "h".into(),
                expires_at_ms: 1,
                acquired_at_ms: 0,
                fence: None,
            }))
        }
    }

    #[tokio::test]
    async fn redacts_raw_fields_by_default() {
        let events: Arc<Mutex<Vec<TelemetryEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_events = events.clone();
        let options = TelemetryOptions::new(move |event| sink_events.lock().unwrap().push(event));
        let backend = TelemetryBackend::new(Arc::new(StubBackend), options);

        let key = UserKey::parse("k").unwrap();
        let _ = backend.acquire(&key, 1000, None).await.unwrap();

        let recorded = events.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].raw_key.is_none());
        assert!(recorded[0].key_hash.is_some());
    }

    #[tokio::test]
    async fn include_raw_always_attaches_raw_fields() {
        let events: Arc<Mutex<Vec<TelemetryEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_events = events.clone();
        let options = TelemetryOptions::new(move |event| sink_events.lock().unwrap().push(event))
            .with_include_raw(IncludeRaw::Always);
        let backend = TelemetryBackend::new(Arc::new(StubBackend), options);

        let key = UserKey::parse("k").unwrap();
        let _ = backend.acquire(&key, 1000, None).await.unwrap();

        let recorded = events.lock().unwrap();
        assert_eq!(recorded[0].raw_key.as_deref(), Some("k"));
    }

    #[tokio::test]
    async fn panicking_predicate_fails_safe_to_redacted() {
        let events: Arc<Mutex<Vec<TelemetryEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_events = events.clone();
        let options = TelemetryOptions::new(move |event| sink_events.lock().unwrap().push(event))
            .with_include_raw(IncludeRaw::Predicate(Box::new(|_| panic!("boom"))));
        let backend = TelemetryBackend::new(Arc::new(StubBackend), options);

        let key = UserKey::parse("k").unwrap();
        let _ = backend.acquire(&key, 1000, None).await.unwrap();

        let recorded = events.lock().unwrap();
        assert!(recorded[0].raw_key.is_none());
    }

    #[tokio::test]
    async fn sink_panic_does_not_propagate() {
        let options = TelemetryOptions::new(|_event| panic!("sink exploded"));
        let backend = TelemetryBackend::new(Arc::new(StubBackend), options);
        let key = UserKey::parse("k").unwrap();
        // Must not panic despite the sink panicking internally.
        let outcome = backend.acquire(&key, 1000, None).await.unwrap();
        assert_eq!(outcome, AcquireOutcome::Locked);
    }
}

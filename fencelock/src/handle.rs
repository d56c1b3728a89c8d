//! Scoped lock handle: a runtime `active -> disposing -> disposed` state
//! machine guaranteeing at-most-once release I/O.
//!
//! A caller's explicit `release()` and a scope-exit cleanup can race, both
//! observing the handle as "still active" and both attempting release I/O.
//! Rust has no async `Drop`, so disposal can't run as a destructor, and
//! there is no cheap way to hand a second caller the exact same in-flight
//! `Future` a first caller is already polling. A `tokio::sync::Mutex`
//! serializing every disposal attempt gets the same observable effect: the
//! second caller blocks until the first's release I/O has actually
//! finished, then sees the `AtomicU8` state has already left `ACTIVE` and
//! returns without touching the backend again.

use fencelock_backend::{CancellationToken, LockBackend};
use fencelock_core::{CoreError, FenceToken, LockId};
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

const ACTIVE: u8 = 0;
const DISPOSING: u8 = 1;
const DISPOSED: u8 = 2;

/// How a [`LockHandle`] behaves when its own best-effort disposal path
/// (scope exit without an explicit `dispose`/`release` call) hits an error.
#[derive(Clone)]
pub struct ScopeHandleOptions {
    /// Called with any error raised while releasing on the best-effort path.
    /// Defaults to a `tracing::warn!` log; release errors on this path are
    /// never propagated, since nothing is left to propagate them to.
    pub on_release_error: Arc<dyn Fn(&CoreError) + Send + Sync>,
    /// Upper bound on how long best-effort disposal is allowed to take
    /// before it's abandoned via the handle's own cancellation token.
    pub dispose_timeout_ms: u64,
}

impl std::fmt::Debug for ScopeHandleOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeHandleOptions")
            .field("dispose_timeout_ms", &self.dispose_timeout_ms)
            .finish_non_exhaustive()
    }
}

impl Default for ScopeHandleOptions {
    fn default() -> Self {
        ScopeHandleOptions {
            on_release_error: Arc::new(|err| {
                warn!(error = %err, "best-effort lock disposal failed to release");
            }),
            dispose_timeout_ms: 5_000,
        }
    }
}

impl ScopeHandleOptions {
    pub fn with_on_release_error(
        mut self,
        on_release_error: impl Fn(&CoreError) + Send + Sync + 'static,
    ) -> Self {
        self.on_release_error = Arc::new(on_release_error);
        self
    }

    pub fn with_dispose_timeout_ms(mut self, dispose_timeout_ms: u64) -> Self {
        self.dispose_timeout_ms = dispose_timeout_ms;
        self
    }
}

/// A held lock, scoped to the caller's use of it.
///
/// Exactly one of `release()`, `extend()`'s eventual `release()`/`dispose()`,
/// or the best-effort `dispose()` called at the end of a caller's own scope
/// performs the actual release I/O; every other call observes the handle as
/// already disposing or disposed and returns immediately without touching
/// the backend a second time.
pub struct LockHandle<B: LockBackend> {
    backend: Arc<B>,
    lock_id: LockId,
    fence: Option<FenceToken>,
    expires_at_ms: Arc<std::sync::atomic::AtomicI64>,
    state: Arc<AtomicU8>,
    /// Serializes every disposal attempt (`release()` and `dispose()`
    /// alike) so a racing second caller blocks on the first's in-flight
    /// release instead of returning before it has actually happened.
    dispose_lock: Arc<AsyncMutex<()>>,
    cancellation: CancellationToken,
    options: ScopeHandleOptions,
}

impl<B: LockBackend> LockHandle<B> {
    pub(crate) fn new(
        backend: Arc<B>,
        lock_id: LockId,
        expires_at_ms: i64,
        fence: Option<FenceToken>,
        options: ScopeHandleOptions,
    ) -> Self {
        LockHandle {
            backend,
            lock_id,
            fence,
            expires_at_ms: Arc::new(std::sync::atomic::AtomicI64::new(expires_at_ms)),
            state: Arc::new(AtomicU8::new(ACTIVE)),
            dispose_lock: Arc::new(AsyncMutex::new(())),
            cancellation: CancellationToken::new(),
            options,
        }
    }

    pub fn lock_id(&self) -> &LockId {
        &self.lock_id
    }

    pub fn fence(&self) -> Option<FenceToken> {
        self.fence
    }

    pub fn expires_at_ms(&self) -> i64 {
        self.expires_at_ms.load(Ordering::SeqCst)
    }

    /// `true` once this handle has entered (or finished) disposal, via
    /// either `release()`/`dispose()` or a concurrent best-effort path.
    pub fn is_disposed(&self) -> bool {
        self.state.load(Ordering::SeqCst) != ACTIVE
    }

    /// Extend the lock to `now + ttl_ms`, replacing (not adding to) the
    /// current expiry. Not idempotent: always dispatches to the backend.
    /// Returns `Ok(false)` rather than an error when the backend reports
    /// the lock as no longer owned or already expired — that is a result,
    /// not a failure, per the underlying contract.
    pub async fn extend(&self, ttl_ms: i64) -> Result<bool, CoreError> {
        let result = self
            .backend
            .extend(&self.lock_id, ttl_ms, Some(&self.cancellation))
            .await?;
        if result.ok {
            if let Some(expiry) = result.expires_at_ms {
                self.expires_at_ms.store(expiry, Ordering::SeqCst);
            }
        }
        Ok(result.ok)
    }

    /// Explicitly release the lock. Idempotent: a second call (from this
    /// handle or a racing scope-exit disposal) blocks until the first
    /// caller's release I/O has actually completed, then returns `Ok(false)`
    /// without performing I/O again — re-entrance-safe rather than merely
    /// CAS-and-bail. Mirrors the backend contract's own `{ ok }` shape
    /// rather than collapsing "not actually released" into success.
    pub async fn release(&self) -> Result<bool, CoreError> {
        let _guard = self.dispose_lock.lock().await;
        if !self.begin_disposal() {
            return Ok(false);
        }
        let result = self.backend.release(&self.lock_id, Some(&self.cancellation)).await;
        self.state.store(DISPOSED, Ordering::SeqCst);
        result.map(|mutation| mutation.ok)
    }

    /// Best-effort disposal for a caller that cannot `.await` a cleanup
    /// path (e.g. an error branch unwinding past the handle). Swallows and
    /// logs any release error via [`ScopeHandleOptions::on_release_error`]
    /// rather than propagating it, and gives up after
    /// [`ScopeHandleOptions::dispose_timeout_ms`]. Blocks behind any other
    /// in-flight `release()`/`dispose()` on this handle rather than racing
    /// it, per the same re-entrance rule as `release()`.
    pub async fn dispose(&self) {
        let _guard = self.dispose_lock.lock().await;
        if !self.begin_disposal() {
            return;
        }
        let backend = Arc::clone(&self.backend);
        let lock_id = self.lock_id.clone();
        let cancellation = self.cancellation.clone();
        let timeout = Duration::from_millis(self.options.dispose_timeout_ms);
        let release_future = backend.release(&lock_id, Some(&cancellation));
        let outcome = timeout_or_cancel(timeout, &cancellation, release_future).await;
        self.state.store(DISPOSED, Ordering::SeqCst);
        match outcome {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => (self.options.on_release_error)(&err),
            Err(_) => {
                cancellation.cancel();
                (self.options.on_release_error)(&CoreError::acquisition_timeout());
            }
        }
    }

    /// Cancel any in-flight operation on this handle (extend, or a
    /// best-effort disposal still waiting on the backend).
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Transition `ACTIVE -> DISPOSING`. Returns `true` for the single
    /// caller that wins the race and must actually run release I/O.
    fn begin_disposal(&self) -> bool {
        self.state
            .compare_exchange(ACTIVE, DISPOSING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

async fn timeout_or_cancel<F, T>(
    duration: Duration,
    cancellation: &CancellationToken,
    future: F,
) -> Result<T, ()>
where
    F: Future<Output = T>,
{
    tokio::select! {
        result = future => Ok(result),
        _ = tokio::time::sleep(duration) => {
            cancellation.cancel();
            Err(())
        }
    }
}

impl<B: LockBackend> Drop for LockHandle<B> {
    /// A synchronous destructor can't await release I/O. If the handle is
    /// dropped while still active, this only warns that disposal was
    /// skipped — callers are expected to `release()` or `dispose()`
    /// explicitly.
    fn drop(&mut self) {
        if self.state.load(Ordering::SeqCst) == ACTIVE {
            warn!(
                lock_id = %self.lock_id,
                "lock handle dropped without release() or dispose(); lock will expire via TTL"
            );
        }
    }
}

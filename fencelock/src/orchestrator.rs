//! Retry/backoff acquisition orchestrator: turns a backend's single-attempt
//! `acquire` into a blocking acquire with an overall timeout and cooperative
//! cancellation.

use fencelock_backend::{AcquireOutcome, CancellationToken, LockBackend};
use fencelock_core::{CoreError, FenceToken, LockId, UserKey};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::handle::{LockHandle, ScopeHandleOptions};

/// Delay schedule applied between acquisition attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffStrategy {
    /// No delay between attempts.
    None,
    /// The same delay before every retry.
    Fixed { delay_ms: u64 },
    /// Delay grows by `multiplier` each attempt, capped at `max_ms`.
    Exponential {
        base_ms: u64,
        multiplier: f64,
        max_ms: u64,
    },
}

impl BackoffStrategy {
    fn delay_for_attempt(&self, attempt: u32) -> u64 {
        match self {
            BackoffStrategy::None => 0,
            BackoffStrategy::Fixed { delay_ms } => *delay_ms,
            BackoffStrategy::Exponential {
                base_ms,
                multiplier,
                max_ms,
            } => {
                let delay = (*base_ms as f64) * multiplier.powi(attempt as i32);
                (delay as u64).min(*max_ms)
            }
        }
    }
}

/// Randomization applied on top of [`BackoffStrategy`]'s computed delay, to
/// avoid every waiter retrying in lockstep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Jitter {
    /// No randomization: always the strategy's exact delay.
    None,
    /// Uniformly random in `[0, delay]`.
    Full,
    /// Uniformly random in `[delay / 2, delay]`.
    Equal,
}

impl Jitter {
    fn apply(&self, delay_ms: u64) -> u64 {
        if delay_ms == 0 {
            return 0;
        }
        match self {
            Jitter::None => delay_ms,
            Jitter::Full => rand::thread_rng().gen_range(0..=delay_ms),
            Jitter::Equal => {
                let half = delay_ms / 2;
                half + rand::thread_rng().gen_range(0..=(delay_ms - half))
            }
        }
    }
}

/// Configuration for [`acquire_with_retry`].
#[derive(Debug, Clone)]
pub struct AcquisitionOptions {
    /// Lease duration requested on every attempt.
    pub ttl_ms: i64,
    /// Total wall-clock budget across all attempts. Exceeding it resolves
    /// to [`CoreError::acquisition_timeout`].
    pub timeout_ms: u64,
    /// Upper bound on contended attempts before giving up, independent of
    /// `timeout_ms`. Exceeding it resolves to
    /// [`CoreError::acquisition_timeout`] even if time remains.
    pub max_retries: u32,
    pub backoff: BackoffStrategy,
    pub jitter: Jitter,
    pub scope_options: ScopeHandleOptions,
    /// An acquisition-scoped cancellation token, distinct from the "outer"
    /// token a caller may separately hold via
    /// [`acquire_with_retry_cancellable`]. Per spec.md §4.6/§5, both tokens
    /// apply: the outer token is the only one passed into the backend call
    /// itself, while this one is checked only between retries.
    pub cancellation: Option<CancellationToken>,
}

impl Default for AcquisitionOptions {
    fn default() -> Self {
        AcquisitionOptions {
            ttl_ms: 30_000,
            timeout_ms: 5_000,
            max_retries: 10,
            backoff: BackoffStrategy::Exponential {
                base_ms: 100,
                multiplier: 2.0,
                max_ms: 2_000,
            },
            jitter: Jitter::Equal,
            scope_options: ScopeHandleOptions::default(),
            cancellation: None,
        }
    }
}

impl AcquisitionOptions {
    pub fn with_ttl_ms(mut self, ttl_ms: i64) -> Self {
        self.ttl_ms = ttl_ms;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set the acquisition-scoped cancellation token (distinct from the
    /// "outer" token passed to [`acquire_with_retry_cancellable`]).
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = Some(cancellation);
        self
    }
}

/// Retry `backend.acquire(key, ...)` under `options.backoff`/`jitter` until
/// it succeeds, the caller cancels, `options.timeout_ms` elapses, or
/// `options.max_retries` contended attempts have been made — whichever
/// comes first.
///
/// Each failed attempt (an [`AcquireOutcome::Locked`]) sleeps for
/// `jitter.apply(backoff.delay_for_attempt(attempt))` before retrying.
/// Backend errors other than contention propagate immediately; contention
/// itself is never an error (it's a retry signal), matching the backend
/// contract's own `Locked`-is-a-result-not-an-error rule.
pub async fn acquire_with_retry<B: LockBackend>(
    backend: Arc<B>,
    key: &UserKey,
    options: &AcquisitionOptions,
) -> Result<LockHandle<B>, CoreError> {
    let cancellation = CancellationToken::new();
    acquire_with_retry_cancellable(backend, key, options, &cancellation).await
}

/// Same as [`acquire_with_retry`], but cooperatively cancellable via an
/// externally-held, "outer" [`CancellationToken`] — the only token ever
/// passed into the backend call itself. `options.cancellation`, if set, is
/// a second, acquisition-scoped token checked only between retries (never
/// passed to the backend), matching spec.md §4.6/§5's two-token model.
pub async fn acquire_with_retry_cancellable<B: LockBackend>(
    backend: Arc<B>,
    key: &UserKey,
    options: &AcquisitionOptions,
    outer_cancellation: &CancellationToken,
) -> Result<LockHandle<B>, CoreError> {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(options.timeout_ms);
    let mut attempt: u32 = 0;

    loop {
        if is_cancelled(outer_cancellation, options.cancellation.as_ref()) {
            return Err(CoreError::aborted());
        }

        let outcome = backend
            .acquire(key, options.ttl_ms, Some(outer_cancellation))
            .await?;

        match outcome {
            AcquireOutcome::Acquired {
                lock_id,
                expires_at_ms,
                fence,
            } => {
                return Ok(build_handle(
                    backend,
                    lock_id,
                    expires_at_ms,
                    fence,
                    options.scope_options.clone(),
                ));
            }
            AcquireOutcome::Locked => {
                let now = tokio::time::Instant::now();
                if now >= deadline || attempt >= options.max_retries {
                    return Err(CoreError::acquisition_timeout());
                }

                let raw_delay = options.backoff.delay_for_attempt(attempt);
                let delay_ms = options.jitter.apply(raw_delay);
                let remaining = deadline.saturating_duration_since(now);
                let sleep_for = Duration::from_millis(delay_ms).min(remaining);
                if sleep_for.is_zero() && delay_ms > 0 {
                    return Err(CoreError::acquisition_timeout());
                }

                debug!(attempt, delay_ms, "lock contended, retrying after backoff");
                tokio::select! {
                    _ = tokio::time::sleep(sleep_for) => {}
                    _ = wait_for_cancellation(outer_cancellation, options.cancellation.as_ref()) => {
                        return Err(CoreError::aborted());
                    }
                }
                attempt += 1;
            }
        }
    }
}

fn is_cancelled(outer: &CancellationToken, acquisition: Option<&CancellationToken>) -> bool {
    outer.is_cancelled() || acquisition.map(|t| t.is_cancelled()).unwrap_or(false)
}

fn build_handle<B: LockBackend>(
    backend: Arc<B>,
    lock_id: LockId,
    expires_at_ms: i64,
    fence: Option<FenceToken>,
    scope_options: ScopeHandleOptions,
) -> LockHandle<B> {
    LockHandle::new(backend, lock_id, expires_at_ms, fence, scope_options)
}

async fn wait_for_cancellation(outer: &CancellationToken, acquisition: Option<&CancellationToken>) {
    loop {
        if is_cancelled(outer, acquisition) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Acquire a lock, run `body` while holding it, then release — regardless
/// of whether `body` succeeds, fails, or panics partway through an
/// `.await`. The lock is released via the handle's best-effort
/// [`LockHandle::dispose`] path, since `body`'s own error is the one that
/// should propagate, not a secondary release failure.
pub async fn run_with_lock<B, F, Fut, T>(
    backend: Arc<B>,
    key: &UserKey,
    options: &AcquisitionOptions,
    body: F,
) -> Result<T, CoreError>
where
    B: LockBackend,
    F: FnOnce(&LockHandle<B>) -> Fut,
    Fut: std::future::Future<Output = Result<T, CoreError>>,
{
    let handle = acquire_with_retry(backend, key, options).await?;
    let result = body(&handle).await;
    handle.dispose().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use fencelock_testkit::InMemoryBackend;

    #[tokio::test]
    async fn acquires_immediately_when_uncontended() {
        let backend = Arc::new(InMemoryBackend::new("lock"));
        let key = UserKey::parse("free").unwrap();
        let options = AcquisitionOptions::default();

        let handle = acquire_with_retry(backend, &key, &options).await.unwrap();
        assert!(!handle.is_disposed());
    }

    #[tokio::test]
    async fn retries_until_contender_releases_then_succeeds() {
        let backend = Arc::new(InMemoryBackend::new("lock"));
        let key = UserKey::parse("contended").unwrap();

        let holder = acquire_with_retry(
            Arc::clone(&backend),
            &key,
            &AcquisitionOptions::default().with_ttl_ms(200),
        )
        .await
        .unwrap();

        let backend_for_waiter = Arc::clone(&backend);
        let key_for_waiter = key.clone();
        let waiter = tokio::spawn(async move {
            let options = AcquisitionOptions::default()
                .with_backoff(BackoffStrategy::Fixed { delay_ms: 20 })
                .with_jitter(Jitter::None)
                .with_timeout_ms(2_000);
            acquire_with_retry(backend_for_waiter, &key_for_waiter, &options).await
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        holder.release().await.unwrap();

        let result = waiter.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn times_out_when_never_released() {
        let backend = Arc::new(InMemoryBackend::new("lock"));
        let key = UserKey::parse("stuck").unwrap();

        let _holder = acquire_with_retry(Arc::clone(&backend), &key, &AcquisitionOptions::default())
            .await
            .unwrap();

        let options = AcquisitionOptions::default()
            .with_timeout_ms(80)
            .with_backoff(BackoffStrategy::Fixed { delay_ms: 10 })
            .with_jitter(Jitter::None);
        let result = acquire_with_retry(backend, &key, &options).await;
        assert!(matches!(result, Err(CoreError::AcquisitionTimeout { .. })));
    }

    #[tokio::test]
    async fn max_retries_gives_up_before_the_timeout_elapses() {
        let backend = Arc::new(InMemoryBackend::new("lock"));
        let key = UserKey::parse("capped").unwrap();

        let _holder = acquire_with_retry(Arc::clone(&backend), &key, &AcquisitionOptions::default())
            .await
            .unwrap();

        // A generous timeout that would allow hundreds of 5ms retries, but
        // max_retries gives up after 3 regardless of how much time is left.
        let options = AcquisitionOptions::default()
            .with_timeout_ms(10_000)
            .with_max_retries(3)
            .with_backoff(BackoffStrategy::Fixed { delay_ms: 5 })
            .with_jitter(Jitter::None);

        let started = tokio::time::Instant::now();
        let result = acquire_with_retry(backend, &key, &options).await;
        assert!(matches!(result, Err(CoreError::AcquisitionTimeout { .. })));
        assert!(started.elapsed() < Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn cancellation_aborts_a_waiting_acquire() {
        let backend = Arc::new(InMemoryBackend::new("lock"));
        let key = UserKey::parse("cancel-me").unwrap();

        let _holder = acquire_with_retry(Arc::clone(&backend), &key, &AcquisitionOptions::default())
            .await
            .unwrap();

        let cancellation = CancellationToken::new();
        let options = AcquisitionOptions::default()
            .with_timeout_ms(5_000)
            .with_backoff(BackoffStrategy::Fixed { delay_ms: 50 })
            .with_jitter(Jitter::None);

        let cancellation_clone = cancellation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            cancellation_clone.cancel();
        });

        let result =
            acquire_with_retry_cancellable(backend, &key, &options, &cancellation).await;
        assert!(matches!(result, Err(CoreError::Aborted { .. })));
    }

    #[tokio::test]
    async fn acquisition_scoped_cancellation_aborts_independently_of_the_outer_token() {
        // The acquisition-scoped token lives in `AcquisitionOptions`, distinct
        // from the "outer" token passed to `acquire_with_retry_cancellable`.
        // Cancelling only the former must still abort the retry loop.
        let backend = Arc::new(InMemoryBackend::new("lock"));
        let key = UserKey::parse("scoped-cancel").unwrap();

        let _holder = acquire_with_retry(Arc::clone(&backend), &key, &AcquisitionOptions::default())
            .await
            .unwrap();

        let acquisition_token = CancellationToken::new();
        let outer_token = CancellationToken::new();
        let options = AcquisitionOptions::default()
            .with_timeout_ms(5_000)
            .with_backoff(BackoffStrategy::Fixed { delay_ms: 50 })
            .with_jitter(Jitter::None)
            .with_cancellation(acquisition_token.clone());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            acquisition_token.cancel();
        });

        let result =
            acquire_with_retry_cancellable(backend, &key, &options, &outer_token).await;
        assert!(matches!(result, Err(CoreError::Aborted { .. })));
        assert!(!outer_token.is_cancelled());
    }

    #[tokio::test]
    async fn run_with_lock_releases_even_when_body_errors() {
        let backend = Arc::new(InMemoryBackend::new("lock"));
        let key = UserKey::parse("scoped").unwrap();
        let options = AcquisitionOptions::default();

        let result: Result<(), CoreError> =
            run_with_lock(Arc::clone(&backend), &key, &options, |_handle| async {
                Err(CoreError::invalid_argument("body failed"))
            })
            .await;
        assert!(result.is_err());
        assert!(!backend.is_locked(&key, None).await.unwrap());
    }

    #[test]
    fn exponential_backoff_caps_at_max() {
        let strategy = BackoffStrategy::Exponential {
            base_ms: 50,
            multiplier: 2.0,
            max_ms: 300,
        };
        assert_eq!(strategy.delay_for_attempt(0), 50);
        assert_eq!(strategy.delay_for_attempt(1), 100);
        assert_eq!(strategy.delay_for_attempt(10), 300);
    }

    #[test]
    fn equal_jitter_stays_within_half_to_full_range() {
        for _ in 0..50 {
            let delayed = Jitter::Equal.apply(100);
            assert!((50..=100).contains(&delayed));
        }
    }

    #[test]
    fn full_jitter_stays_within_zero_to_full_range() {
        for _ in 0..50 {
            let delayed = Jitter::Full.apply(100);
            assert!(delayed <= 100);
        }
    }
}

//! Clock abstraction so logic never calls `Utc::now()` directly.
//!
//! Every liveness and expiry computation takes "now" as an explicit
//! parameter rather than reaching for the wall clock mid-computation, so
//! tests can inject a fake clock and assert exact before/after expiry
//! behavior without sleeping.

use chrono::Utc;

/// A source of the current time, expressed in milliseconds since the Unix
/// epoch. Implementations must be monotonic enough for liveness comparisons
/// but are not required to be monotonic across process restarts.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;
}

/// The real wall clock, backed by `chrono::Utc::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

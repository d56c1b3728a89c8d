//! The single liveness predicate used everywhere an expiry is checked.
//!
//! Every expiration comparison in the system calls this one function with
//! this one tolerance. Backends that compare timestamps in their own
//! scripting or query layer receive the tolerance as a parameter; none may
//! embed a literal of their own.

/// Uniform clock-skew allowance, in milliseconds, applied to every liveness
/// check across the workspace.
pub const TIME_TOLERANCE_MS: i64 = 1000;

/// `true` iff a record with the given `expires_at_ms` is still in force at
/// `now_ms`, allowing `tolerance_ms` of benign clock skew.
///
/// Monotone in `expires_at_ms` (larger expiry never turns a live record
/// dead) and anti-monotone in `now_ms` (later "now" never turns a dead
/// record live), for fixed tolerance.
pub fn is_live(expires_at_ms: i64, now_ms: i64, tolerance_ms: i64) -> bool {
    expires_at_ms > now_ms - tolerance_ms
}

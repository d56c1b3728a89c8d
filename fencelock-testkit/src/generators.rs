//! proptest generators for exercising the lock protocol's quantified invariants.

use proptest::prelude::*;

/// Generates syntactically valid (non-empty, <=512 byte, ASCII) user key
/// candidates. Restricted to ASCII so generated cases never depend on
/// Unicode normalization behavior, which is exercised separately by
/// `fencelock-core`'s own unit tests.
pub fn arb_user_key() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_./-]{1,64}"
}

/// Generates positive TTLs in a range representative of real lock
/// durations (100ms .. 60s).
pub fn arb_ttl_ms() -> impl Strategy<Value = i64> {
    100i64..60_000i64
}

//! fencelock-testkit - an in-memory reference [`LockBackend`] plus proptest
//! generators, used to exercise the lock protocol's invariants without a
//! live Redis/Postgres/Mongo.
//!
//! A test double, documented as such, never intended as a production
//! adapter.

mod generators;
mod in_memory;

pub use generators::{arb_ttl_ms, arb_user_key};
pub use in_memory::InMemoryBackend;

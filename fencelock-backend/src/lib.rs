//! fencelock-backend - the backend contract and the telemetry decorator.
//!
//! A `LockBackend` implementation is an external collaborator (a Redis Lua
//! script, a SQL transaction, a Mongo findAndModify) that must make each of
//! the five operations below atomic end-to-end. This crate defines the
//! contract those adapters implement and a generic decorator
//! (`TelemetryBackend`) that wraps any of them with observability by
//! composition, not inheritance.

mod cancellation;
mod contract;
mod telemetry;

pub use cancellation::CancellationToken;
pub use contract::{
    AcquireOutcome, BackendCapabilities, LockBackend, LookupQuery, LookupResult, MutationResult,
    SanitizedLockInfo, TimeAuthority,
};
pub use telemetry::{IncludeRaw, TelemetryBackend, TelemetryEvent, TelemetryOperation, TelemetryOptions};

//! fencelock-core - pure data types, key derivation, and error taxonomy
//!
//! No I/O lives here. Everything in this crate is deterministic given its
//! inputs, which is what lets `fencelock-backend` adapters and the
//! `fencelock` orchestrator share one notion of "is this lock still in
//! force" and "what does a storage key look like" without duplicating the
//! logic per backend.

mod clock;
mod error;
mod fence;
mod ident;
mod key;
mod liveness;
mod record;

pub use clock::{Clock, SystemClock};
pub use error::{CoreError, ErrorContext, MutationOutcome, MutationReason};
pub use fence::FenceToken;
pub use ident::{hash_key, validate_lock_id_format, LockId, UserKey, LOCK_ID_LEN};
pub use key::{make_fence_key, make_storage_key, FenceKey, StorageKey};
pub use liveness::{is_live, TIME_TOLERANCE_MS};
pub use record::{FenceCounterRecord, LockRecord, ReverseIndexEntry};

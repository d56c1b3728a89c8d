//! Error taxonomy and the backend-result semantics mapper.
//!
//! One variant per failure mode, each carrying the fields a caller needs to
//! act on it, collapsed into a single `#[non_exhaustive]` enum: backend
//! adapters map into it, they never extend it.

use std::fmt;

/// Context attached to every [`CoreError`]: the key and/or lock id involved,
/// and an optional underlying cause.
#[derive(Debug, Default, Clone)]
pub struct ErrorContext {
    pub key: Option<String>,
    pub lock_id: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_lock_id(mut self, lock_id: impl Into<String>) -> Self {
        self.lock_id = Some(lock_id.into());
        self
    }
}

/// The closed set of error kinds a backend adapter or the orchestrator can
/// raise. Validation errors are raised synchronously before any I/O;
/// backend operational errors are mapped into this taxonomy by the adapter;
/// contention is a result, never an error.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CoreError {
    #[error("invalid argument: {message}")]
    InvalidArgument {
        message: String,
        context: ErrorContext,
    },

    #[error("storage service unavailable")]
    ServiceUnavailable {
        context: ErrorContext,
        #[source]
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("authentication with the storage backend failed")]
    AuthFailed {
        context: ErrorContext,
        #[source]
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("rate limited by the storage backend")]
    RateLimited {
        context: ErrorContext,
        #[source]
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("storage backend operation timed out")]
    NetworkTimeout {
        context: ErrorContext,
        #[source]
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("acquisition timed out before a lock became available")]
    AcquisitionTimeout { context: ErrorContext },

    #[error("operation aborted via cancellation")]
    Aborted { context: ErrorContext },

    #[error("internal error")]
    Internal {
        context: ErrorContext,
        #[source]
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl CoreError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        CoreError::InvalidArgument {
            message: message.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn invalid_argument_with(message: impl Into<String>, context: ErrorContext) -> Self {
        CoreError::InvalidArgument {
            message: message.into(),
            context,
        }
    }

    pub fn internal(cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        CoreError::Internal {
            context: ErrorContext::new(),
            cause: Some(Box::new(cause)),
        }
    }

    pub fn aborted() -> Self {
        CoreError::Aborted {
            context: ErrorContext::new(),
        }
    }

    pub fn acquisition_timeout() -> Self {
        CoreError::AcquisitionTimeout {
            context: ErrorContext::new(),
        }
    }

    /// The context attached to this error, if any variant carries one.
    pub fn context(&self) -> &ErrorContext {
        match self {
            CoreError::InvalidArgument { context, .. }
            | CoreError::ServiceUnavailable { context, .. }
            | CoreError::AuthFailed { context, .. }
            | CoreError::RateLimited { context, .. }
            | CoreError::NetworkTimeout { context, .. }
            | CoreError::AcquisitionTimeout { context }
            | CoreError::Aborted { context }
            | CoreError::Internal { context, .. } => context,
        }
    }
}

/// The backend-result semantics mapper's common outcome set. Backends
/// classify their raw observation (a numeric script return code, or a
/// `{ document_exists, ownership_valid, is_live }` tuple) into one of these
/// before projecting to the public `{ ok }` shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    Succeeded,
    ObservableExpired,
    NeverExisted,
    OwnershipMismatch,
    CleanedUpAfterExpiry,
    AmbiguousUnknown,
}

impl MutationOutcome {
    /// Did the mutation (release/extend) succeed?
    pub fn is_ok(&self) -> bool {
        matches!(self, MutationOutcome::Succeeded)
    }

    /// The hidden-metadata reason exposed only to the telemetry channel,
    /// never to the public `{ ok }` result.
    pub fn reason(&self) -> Option<MutationReason> {
        match self {
            MutationOutcome::Succeeded => None,
            MutationOutcome::ObservableExpired | MutationOutcome::CleanedUpAfterExpiry => {
                Some(MutationReason::Expired)
            }
            MutationOutcome::NeverExisted => Some(MutationReason::NotFound),
            MutationOutcome::OwnershipMismatch => Some(MutationReason::NotFound),
            MutationOutcome::AmbiguousUnknown => Some(MutationReason::NotFound),
        }
    }
}

/// Public-facing failure reason carried as hidden metadata on the
/// telemetry event's `reason` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationReason {
    Locked,
    Expired,
    NotFound,
}

impl fmt::Display for MutationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MutationReason::Locked => "locked",
            MutationReason::Expired => "expired",
            MutationReason::NotFound => "not-found",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn succeeded_has_no_reason() {
        assert!(MutationOutcome::Succeeded.is_ok());
        assert_eq!(MutationOutcome::Succeeded.reason(), None);
    }

    #[test]
    fn non_success_outcomes_carry_a_reason() {
        for outcome in [
            MutationOutcome::ObservableExpired,
            MutationOutcome::NeverExisted,
            MutationOutcome::OwnershipMismatch,
            MutationOutcome::CleanedUpAfterExpiry,
            MutationOutcome::AmbiguousUnknown,
        ] {
            assert!(!outcome.is_ok());
            assert!(outcome.reason().is_some());
        }
    }

    #[test]
    fn context_builder_roundtrip() {
        let ctx = ErrorContext::new().with_key("k").with_lock_id("l");
        assert_eq!(ctx.key.as_deref(), Some("k"));
        assert_eq!(ctx.lock_id.as_deref(), Some("l"));
    }

    #[test]
    fn invalid_argument_display() {
        let err = CoreError::invalid_argument("key too long");
        assert_eq!(err.to_string(), "invalid argument: key too long");
    }
}

//! Protocol-level error type.
//!
//! [`CoordinationError`] wraps the store taxonomy and adds the failures only
//! a recipe can produce: an election step the store refused for a
//! non-contention reason, a retry budget running dry, and a logical wait
//! timing out. The propagation policy is the store's: transient contention
//! never escapes a protocol step, session loss always does.

use conclave_core::{PathError, StoreError};
use std::time::Duration;

/// Errors surfaced by the coordination recipes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinationError {
    /// A store failure the recipe could not absorb.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The leader-node create failed for a reason other than losing the
    /// race; the caller may retry the whole probing step.
    #[error("leader election unavailable")]
    ElectionUnavailable {
        /// The store failure behind the refusal
        #[source]
        source: StoreError,
    },

    /// A bounded retry loop exhausted its attempt budget.
    #[error("write failed after {attempts} attempts")]
    RetriesExhausted {
        /// Attempts made, including the first
        attempts: u32,
        /// The contention error observed on the final attempt
        #[source]
        last: StoreError,
    },

    /// A logical wait elapsed before its condition became true.
    ///
    /// Abandoning the wait releases only client-local state; store-side
    /// ephemeral nodes follow their session's lifetime.
    #[error("timed out waiting for {waiting_for} after {elapsed:?}")]
    Timeout {
        /// What the participant was suspended on
        waiting_for: String,
        /// The wait budget that elapsed
        elapsed: Duration,
    },

    /// A recipe was constructed with unusable parameters.
    #[error("invalid protocol configuration: {reason}")]
    InvalidConfig {
        /// What was wrong with the parameters
        reason: String,
    },

    /// A derived node path failed validation.
    #[error("invalid node path")]
    Path(#[from] PathError),
}

impl CoordinationError {
    /// Create an `ElectionUnavailable` error.
    pub fn election_unavailable(source: StoreError) -> Self {
        Self::ElectionUnavailable { source }
    }

    /// Create a `Timeout` error.
    pub fn timeout(waiting_for: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            waiting_for: waiting_for.into(),
            elapsed,
        }
    }

    /// Create an `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// True when the underlying cause is session loss, which is fatal to
    /// the current protocol epoch.
    pub fn is_session_loss(&self) -> bool {
        match self {
            Self::Store(e) | Self::ElectionUnavailable { source: e } => e.is_session_loss(),
            _ => false,
        }
    }
}

/// Standard result type for recipe operations.
pub type CoordinationResult<T> = std::result::Result<T, CoordinationError>;

//! Unified error type for coordination store operations.
//!
//! Every store-facing call in the workspace resolves to a [`StoreError`] on
//! failure. The enum deliberately mirrors the store's own failure taxonomy:
//! contention errors (`NodeExists`, `VersionMismatch`) that protocol steps
//! absorb by re-reading and retrying, optimistic-read misses (`NoNode`) that
//! mean "condition not yet true", and session-level failures that are fatal
//! to the current protocol epoch and must propagate.

use crate::path::NodePath;
use crate::store::Version;

/// Errors surfaced by a [`CoordinationStore`](crate::store::CoordinationStore).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Create-if-absent lost: the node was already there.
    #[error("node already exists: {path}")]
    NodeExists {
        /// Path of the pre-existing node
        path: NodePath,
    },

    /// The node addressed by a read, write, or delete does not exist.
    #[error("no node: {path}")]
    NoNode {
        /// Path that resolved to nothing
        path: NodePath,
    },

    /// A conditional write or delete was guarded by a stale version.
    #[error("version mismatch at {path}: expected {expected}, current {current}")]
    VersionMismatch {
        /// Path of the contended node
        path: NodePath,
        /// Version the caller observed
        expected: Version,
        /// Version the store holds now
        current: Version,
    },

    /// The connection to the store dropped. Fatal to the current epoch.
    #[error("connection to coordination store lost")]
    Disconnected,

    /// The store session expired; every ephemeral node it owned is gone.
    /// Fatal to the current epoch.
    #[error("coordination store session expired")]
    SessionExpired,

    /// An armed watch was dropped by its store before firing.
    #[error("watch lost before firing: {path}")]
    WatchLost {
        /// Path the watch was armed on
        path: NodePath,
    },

    /// The store rejected or failed the operation for a reason outside the
    /// recipe contract (quota, auth, marshalling, ...).
    #[error("coordination store unavailable: {reason}")]
    Unavailable {
        /// Human-readable failure description
        reason: String,
    },
}

impl StoreError {
    /// Create a `NodeExists` error.
    pub fn node_exists(path: NodePath) -> Self {
        Self::NodeExists { path }
    }

    /// Create a `NoNode` error.
    pub fn no_node(path: NodePath) -> Self {
        Self::NoNode { path }
    }

    /// Create a `VersionMismatch` error.
    pub fn version_mismatch(path: NodePath, expected: Version, current: Version) -> Self {
        Self::VersionMismatch {
            path,
            expected,
            current,
        }
    }

    /// Create an `Unavailable` error.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// True for session-level failures that end the current protocol epoch.
    ///
    /// A participant seeing one of these must unwind, re-establish a session,
    /// and restart its state machine from the beginning; no protocol step may
    /// absorb them locally.
    pub fn is_session_loss(&self) -> bool {
        matches!(
            self,
            Self::Disconnected | Self::SessionExpired | Self::WatchLost { .. }
        )
    }

    /// True for transient contention that a protocol step resolves by
    /// re-reading current state and retrying: losing a create-if-absent race,
    /// writing through a stale version, or racing a concurrent delete.
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            Self::NodeExists { .. } | Self::VersionMismatch { .. } | Self::NoNode { .. }
        )
    }
}

/// Standard result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

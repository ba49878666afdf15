//! The coordination store contract.
//!
//! [`CoordinationStore`] is the single external collaborator the recipe
//! protocols consume: a hierarchical namespace of nodes with atomic
//! create-if-absent, version-guarded writes, and single-fire change
//! notifications. Implementations wrap a real store client; the testkit
//! provides a deterministic in-memory one.
//!
//! # Watch semantics
//!
//! Watch-arming reads come in `*_watch` variants returning a [`NodeWatch`]
//! alongside the value. A watch fires **at most once**; observing further
//! changes requires a fresh arming call. A watch armed after a change does
//! not see that change retroactively. Events for a given node resolve in the
//! order the store applied the changes, but a client that is slow to re-arm
//! coalesces intermediate changes into "at least one change happened".
//!
//! Session-state transitions are not a separate callback: once the owning
//! session leaves `Connected`, every pending [`NodeWatch`] and every
//! in-flight call resolves to [`StoreError::Disconnected`] or
//! [`StoreError::SessionExpired`], so session loss propagates through `?`
//! instead of being something each handler remembers to check.

use crate::errors::{StoreError, StoreResult};
use crate::path::NodePath;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::oneshot;

/// A node's store-maintained version counter.
///
/// Freshly created nodes start at [`Version::INITIAL`]; every successful
/// `set_data` increments the counter by one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Sentinel that bypasses the version guard on conditional operations.
    pub const ANY: Self = Self(-1);

    /// The version a node carries immediately after creation.
    pub const INITIAL: Self = Self(0);

    /// Wrap a raw store version.
    pub fn new(version: i64) -> Self {
        Self(version)
    }

    /// The raw counter value.
    pub fn get(self) -> i64 {
        self.0
    }

    /// The version after one more successful write.
    pub fn bump(self) -> Self {
        Self(self.0 + 1)
    }

    /// Whether a guard with this expected version admits `current`.
    pub fn admits(self, current: Version) -> bool {
        self == Self::ANY || self == current
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifetime and naming mode for node creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreateMode {
    /// Survives the creating session; removed only by explicit delete.
    Persistent,
    /// Vanishes when the creating session ends.
    Ephemeral,
    /// Persistent, with a store-assigned strictly increasing name suffix.
    PersistentSequential,
    /// Ephemeral, with a store-assigned strictly increasing name suffix.
    EphemeralSequential,
}

impl CreateMode {
    /// Whether nodes of this mode are bound to the creating session.
    pub fn is_ephemeral(self) -> bool {
        matches!(self, Self::Ephemeral | Self::EphemeralSequential)
    }

    /// Whether the store appends a sequence ordinal to the requested path.
    pub fn is_sequential(self) -> bool {
        matches!(self, Self::PersistentSequential | Self::EphemeralSequential)
    }
}

/// Connection state of a store session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Session is live; operations and watches behave normally.
    Connected,
    /// Connection dropped; the session may or may not recover server-side.
    Disconnected,
    /// The store discarded the session and all its ephemeral nodes.
    Expired,
}

impl SessionState {
    /// Whether operations issued in this state can succeed.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// The error a store call or pending watch resolves to in this state.
    pub fn as_error(self) -> Option<StoreError> {
        match self {
            Self::Connected => None,
            Self::Disconnected => Some(StoreError::Disconnected),
            Self::Expired => Some(StoreError::SessionExpired),
        }
    }
}

/// The kind of change a fired watch observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// The watched node came into existence.
    Created,
    /// The watched node was removed (explicitly or with its session).
    Deleted,
    /// The watched node's payload was overwritten.
    DataChanged,
    /// The watched node's set of children changed.
    ChildrenChanged,
}

/// A single-fire change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// Node the watch was armed on.
    pub path: NodePath,
    /// What happened to it.
    pub kind: EventKind,
}

/// Consumer half of a one-shot watch.
///
/// Await [`NodeWatch::wait`] to suspend until the store reports a change on
/// the watched node. Waiting consumes the watch, so "exactly one watch live
/// per participant at a time" falls out of ownership.
#[derive(Debug)]
pub struct NodeWatch {
    path: NodePath,
    rx: oneshot::Receiver<StoreResult<WatchEvent>>,
}

impl NodeWatch {
    /// Create a connected trigger/watch pair for `path`.
    ///
    /// Store implementations hold the [`WatchTrigger`] and fire it when the
    /// node changes or the owning session dies.
    pub fn channel(path: NodePath) -> (WatchTrigger, NodeWatch) {
        let (tx, rx) = oneshot::channel();
        let trigger = WatchTrigger {
            path: path.clone(),
            tx,
        };
        (trigger, NodeWatch { path, rx })
    }

    /// The node this watch is armed on.
    pub fn path(&self) -> &NodePath {
        &self.path
    }

    /// Suspend until the watch fires.
    ///
    /// Resolves `Err` when the owning session left `Connected` while the
    /// watch was pending, or [`StoreError::WatchLost`] if the store dropped
    /// the trigger without firing it.
    pub async fn wait(self) -> StoreResult<WatchEvent> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(StoreError::WatchLost { path: self.path }),
        }
    }
}

/// Producer half of a one-shot watch, held by store implementations.
#[derive(Debug)]
pub struct WatchTrigger {
    path: NodePath,
    tx: oneshot::Sender<StoreResult<WatchEvent>>,
}

impl WatchTrigger {
    /// The node the paired watch is armed on.
    pub fn path(&self) -> &NodePath {
        &self.path
    }

    /// Whether the paired [`NodeWatch`] has been dropped unconsumed.
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }

    /// Deliver a change notification. A dropped consumer is not an error.
    pub fn fire(self, kind: EventKind) {
        let event = WatchEvent {
            path: self.path,
            kind,
        };
        let _ = self.tx.send(Ok(event));
    }

    /// Resolve the paired watch with a session-level failure.
    pub fn fail(self, error: StoreError) {
        let _ = self.tx.send(Err(error));
    }
}

/// The hierarchical coordination store the recipes are built on.
///
/// Contract summary (bit-exact semantics required of implementations):
///
/// - `create` is atomic create-if-absent; it fails with
///   [`StoreError::NodeExists`] and changes nothing when the node is already
///   present. Sequential modes append a store-assigned, strictly increasing,
///   never-reused ordinal to the requested path and cannot collide.
/// - `set_data`/`delete` apply only when the guard
///   [`admits`](Version::admits) the node's current version.
/// - Ephemeral nodes disappear automatically when the creating session ends,
///   never by recipe action.
/// - Reads on an absent node fail with [`StoreError::NoNode`], except
///   `exists`/`exists_watch`, which report absence as `Ok(None)`;
///   `exists_watch` still arms a watch that will fire on creation.
/// - `get_data_watch`/`get_children_watch` arm a watch only when the read
///   succeeds.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Report whether `path` exists, and at which version.
    async fn exists(&self, path: &NodePath) -> StoreResult<Option<Version>>;

    /// Like [`exists`](Self::exists), additionally arming a one-shot watch
    /// that fires on creation, deletion, or data change of `path`.
    async fn exists_watch(&self, path: &NodePath) -> StoreResult<(Option<Version>, NodeWatch)>;

    /// Atomically create `path` if absent, returning the actual path
    /// (which differs from the requested one for sequential modes).
    async fn create(
        &self,
        path: &NodePath,
        payload: &[u8],
        mode: CreateMode,
    ) -> StoreResult<NodePath>;

    /// Overwrite `path`'s payload if `expected` admits its current version.
    /// Returns the new version.
    async fn set_data(
        &self,
        path: &NodePath,
        payload: &[u8],
        expected: Version,
    ) -> StoreResult<Version>;

    /// Read `path`'s payload and version.
    async fn get_data(&self, path: &NodePath) -> StoreResult<(Vec<u8>, Version)>;

    /// Like [`get_data`](Self::get_data), additionally arming a one-shot
    /// watch that fires on deletion or data change of `path`.
    async fn get_data_watch(&self, path: &NodePath)
        -> StoreResult<((Vec<u8>, Version), NodeWatch)>;

    /// List the names of `path`'s direct children, in lexicographic order.
    async fn get_children(&self, path: &NodePath) -> StoreResult<Vec<String>>;

    /// Like [`get_children`](Self::get_children), additionally arming a
    /// one-shot watch that fires when a child is added or removed.
    async fn get_children_watch(&self, path: &NodePath)
        -> StoreResult<(Vec<String>, NodeWatch)>;

    /// Delete `path` if `expected` admits its current version.
    async fn delete(&self, path: &NodePath, expected: Version) -> StoreResult<()>;

    /// Current state of the session backing this handle.
    fn session(&self) -> SessionState;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_guard_admission() {
        let current = Version::new(3);
        assert!(Version::ANY.admits(current));
        assert!(Version::new(3).admits(current));
        assert!(!Version::new(2).admits(current));
        assert_eq!(Version::INITIAL.bump(), Version::new(1));
    }

    #[test]
    fn create_mode_classification() {
        assert!(CreateMode::Ephemeral.is_ephemeral());
        assert!(CreateMode::EphemeralSequential.is_ephemeral());
        assert!(CreateMode::EphemeralSequential.is_sequential());
        assert!(!CreateMode::Persistent.is_ephemeral());
        assert!(CreateMode::PersistentSequential.is_sequential());
    }

    #[test]
    fn session_state_maps_to_errors() {
        assert_eq!(SessionState::Connected.as_error(), None);
        assert_eq!(
            SessionState::Expired.as_error(),
            Some(StoreError::SessionExpired)
        );
        assert!(!SessionState::Disconnected.is_connected());
    }

    #[tokio::test]
    async fn watch_fires_once_with_armed_path() {
        let path = NodePath::new("/group/leader").unwrap();
        let (trigger, watch) = NodeWatch::channel(path.clone());
        trigger.fire(EventKind::Deleted);

        let event = watch.wait().await.unwrap();
        assert_eq!(event.path, path);
        assert_eq!(event.kind, EventKind::Deleted);
    }

    #[tokio::test]
    async fn dropped_trigger_is_watch_lost() {
        let path = NodePath::new("/config").unwrap();
        let (trigger, watch) = NodeWatch::channel(path.clone());
        drop(trigger);

        assert_eq!(watch.wait().await, Err(StoreError::WatchLost { path }));
    }

    #[tokio::test]
    async fn failed_trigger_propagates_session_loss() {
        let path = NodePath::new("/sync/start").unwrap();
        let (trigger, watch) = NodeWatch::channel(path);
        trigger.fail(StoreError::SessionExpired);

        assert_eq!(watch.wait().await, Err(StoreError::SessionExpired));
    }

    #[test]
    fn unfired_watch_stays_pending() {
        let path = NodePath::new("/sync/start").unwrap();
        let (_trigger, watch) = NodeWatch::channel(path);
        let mut wait = tokio_test::task::spawn(watch.wait());
        assert!(wait.poll().is_pending());
    }
}

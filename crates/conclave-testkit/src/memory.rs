//! Deterministic in-memory coordination store.
//!
//! [`MemoryStore`] implements the full store contract (atomic
//! create-if-absent, version-guarded writes, per-parent sequence ordinals,
//! ephemeral lifetimes, one-shot watches) against a single in-process
//! tree, so protocol scenarios run deterministically with no external
//! service. [`MemoryStore::connect`] hands out independent sessions;
//! expiring one removes its ephemeral nodes and errors its pending watches
//! exactly the way a real store session death does.
//!
//! All mutation happens synchronously under one lock, so watch notifications
//! resolve in store-change order.

use async_trait::async_trait;
use conclave_core::{
    CoordinationStore, CreateMode, EventKind, NodePath, NodeWatch, SessionState, StoreError,
    StoreResult, Version, WatchTrigger,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

/// Identifier of one simulated store session.
pub type SessionId = Uuid;

#[derive(Debug, Clone)]
struct NodeRecord {
    payload: Vec<u8>,
    version: i64,
    /// `Some` for ephemeral nodes: the session whose death removes them.
    owner: Option<SessionId>,
}

#[derive(Debug)]
struct WatchReg {
    session: SessionId,
    trigger: WatchTrigger,
}

#[derive(Debug, Default)]
struct State {
    nodes: BTreeMap<String, NodeRecord>,
    /// Watches armed on a node's existence/payload, keyed by node path.
    data_watches: HashMap<String, Vec<WatchReg>>,
    /// Watches armed on a node's child set, keyed by parent path.
    child_watches: HashMap<String, Vec<WatchReg>>,
    sessions: HashMap<SessionId, SessionState>,
    /// Per-parent sequence counters; strictly increasing, never reused.
    sequences: HashMap<String, u64>,
    /// Create calls per requested path that reached the existence check.
    create_attempts: HashMap<String, u32>,
    /// Create calls per requested path that actually created a node.
    create_successes: HashMap<String, u32>,
}

impl State {
    fn with_root() -> Self {
        let mut state = Self::default();
        state.nodes.insert(
            "/".to_string(),
            NodeRecord {
                payload: Vec::new(),
                version: 0,
                owner: None,
            },
        );
        state
    }
}

/// A shared in-memory coordination store.
///
/// Cloning shares the same tree. Tests typically hold one `MemoryStore`,
/// call [`connect`](Self::connect) once per simulated participant, and drive
/// failures with [`expire`](Self::expire) / [`disconnect`](Self::disconnect).
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// An empty store containing only the root node `/`.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::with_root())),
        }
    }

    /// Open a fresh session.
    pub fn connect(&self) -> MemorySession {
        let id = Uuid::new_v4();
        self.state.lock().sessions.insert(id, SessionState::Connected);
        MemorySession {
            state: Arc::clone(&self.state),
            id,
        }
    }

    /// Expire a session: its ephemeral nodes vanish (firing surviving
    /// sessions' watches), its own pending watches and all further calls
    /// fail with [`StoreError::SessionExpired`].
    pub fn expire(&self, session: SessionId) {
        end_session(&mut self.state.lock(), session, SessionState::Expired);
    }

    /// Drop a session's connection: calls and pending watches fail with
    /// [`StoreError::Disconnected`], but its ephemeral nodes remain (the
    /// store has not yet given up on the session).
    pub fn disconnect(&self, session: SessionId) {
        end_session(&mut self.state.lock(), session, SessionState::Disconnected);
    }

    /// Read a node directly, bypassing session checks. Test assertions only.
    pub fn peek(&self, path: &NodePath) -> Option<(Vec<u8>, Version)> {
        let state = self.state.lock();
        state
            .nodes
            .get(path.as_str())
            .map(|n| (n.payload.clone(), Version::new(n.version)))
    }

    /// How many create calls for `path` reached the existence check.
    pub fn create_attempts(&self, path: &NodePath) -> u32 {
        *self
            .state
            .lock()
            .create_attempts
            .get(path.as_str())
            .unwrap_or(&0)
    }

    /// How many create calls for `path` actually created a node.
    pub fn create_successes(&self, path: &NodePath) -> u32 {
        *self
            .state
            .lock()
            .create_successes
            .get(path.as_str())
            .unwrap_or(&0)
    }
}

/// One session's handle on a [`MemoryStore`].
///
/// Implements [`CoordinationStore`]; protocol instances take it as their
/// store handle. Ephemeral nodes created through this handle live exactly as
/// long as the session.
#[derive(Debug)]
pub struct MemorySession {
    state: Arc<Mutex<State>>,
    id: SessionId,
}

impl MemorySession {
    /// This session's identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Expire this session. See [`MemoryStore::expire`].
    pub fn expire(&self) {
        end_session(&mut self.state.lock(), self.id, SessionState::Expired);
    }

    /// Disconnect this session. See [`MemoryStore::disconnect`].
    pub fn disconnect(&self) {
        end_session(&mut self.state.lock(), self.id, SessionState::Disconnected);
    }

    fn guard(&self, state: &State) -> StoreResult<()> {
        match state.sessions.get(&self.id).copied() {
            Some(session) => match session.as_error() {
                None => Ok(()),
                Some(err) => Err(err),
            },
            None => Err(StoreError::SessionExpired),
        }
    }

    fn arm_data_watch(&self, state: &mut State, path: &NodePath) -> NodeWatch {
        let (trigger, watch) = NodeWatch::channel(path.clone());
        let regs = state
            .data_watches
            .entry(path.as_str().to_string())
            .or_default();
        regs.retain(|reg| !reg.trigger.is_abandoned());
        regs.push(WatchReg {
            session: self.id,
            trigger,
        });
        watch
    }

    fn arm_child_watch(&self, state: &mut State, path: &NodePath) -> NodeWatch {
        let (trigger, watch) = NodeWatch::channel(path.clone());
        let regs = state
            .child_watches
            .entry(path.as_str().to_string())
            .or_default();
        regs.retain(|reg| !reg.trigger.is_abandoned());
        regs.push(WatchReg {
            session: self.id,
            trigger,
        });
        watch
    }
}

#[async_trait]
impl CoordinationStore for MemorySession {
    async fn exists(&self, path: &NodePath) -> StoreResult<Option<Version>> {
        let state = self.state.lock();
        self.guard(&state)?;
        Ok(state
            .nodes
            .get(path.as_str())
            .map(|n| Version::new(n.version)))
    }

    async fn exists_watch(&self, path: &NodePath) -> StoreResult<(Option<Version>, NodeWatch)> {
        let mut state = self.state.lock();
        self.guard(&state)?;
        let version = state
            .nodes
            .get(path.as_str())
            .map(|n| Version::new(n.version));
        let watch = self.arm_data_watch(&mut state, path);
        Ok((version, watch))
    }

    async fn create(
        &self,
        path: &NodePath,
        payload: &[u8],
        mode: CreateMode,
    ) -> StoreResult<NodePath> {
        let mut state = self.state.lock();
        self.guard(&state)?;

        let parent = path
            .parent()
            .ok_or_else(|| StoreError::unavailable("cannot create the root node"))?;
        if !state.nodes.contains_key(parent.as_str()) {
            return Err(StoreError::no_node(parent));
        }

        let actual = if mode.is_sequential() {
            let counter = state
                .sequences
                .entry(parent.as_str().to_string())
                .or_insert(0);
            let ordinal = *counter;
            *counter += 1;
            NodePath::new(format!("{}{ordinal:010}", path.as_str()))
                .map_err(|e| StoreError::unavailable(format!("sequential path: {e}")))?
        } else {
            path.clone()
        };

        *state
            .create_attempts
            .entry(path.as_str().to_string())
            .or_default() += 1;

        if state.nodes.contains_key(actual.as_str()) {
            return Err(StoreError::node_exists(actual));
        }

        state.nodes.insert(
            actual.as_str().to_string(),
            NodeRecord {
                payload: payload.to_vec(),
                version: 0,
                owner: mode.is_ephemeral().then_some(self.id),
            },
        );
        *state
            .create_successes
            .entry(path.as_str().to_string())
            .or_default() += 1;

        fire_data_watches(&mut state, actual.as_str(), EventKind::Created);
        fire_child_watches(&mut state, parent.as_str());
        Ok(actual)
    }

    async fn set_data(
        &self,
        path: &NodePath,
        payload: &[u8],
        expected: Version,
    ) -> StoreResult<Version> {
        let mut state = self.state.lock();
        self.guard(&state)?;

        let new_version = {
            let node = state
                .nodes
                .get_mut(path.as_str())
                .ok_or_else(|| StoreError::no_node(path.clone()))?;
            let current = Version::new(node.version);
            if !expected.admits(current) {
                return Err(StoreError::version_mismatch(path.clone(), expected, current));
            }
            node.payload = payload.to_vec();
            node.version += 1;
            Version::new(node.version)
        };

        fire_data_watches(&mut state, path.as_str(), EventKind::DataChanged);
        Ok(new_version)
    }

    async fn get_data(&self, path: &NodePath) -> StoreResult<(Vec<u8>, Version)> {
        let state = self.state.lock();
        self.guard(&state)?;
        let node = state
            .nodes
            .get(path.as_str())
            .ok_or_else(|| StoreError::no_node(path.clone()))?;
        Ok((node.payload.clone(), Version::new(node.version)))
    }

    async fn get_data_watch(
        &self,
        path: &NodePath,
    ) -> StoreResult<((Vec<u8>, Version), NodeWatch)> {
        let mut state = self.state.lock();
        self.guard(&state)?;
        let value = {
            let node = state
                .nodes
                .get(path.as_str())
                .ok_or_else(|| StoreError::no_node(path.clone()))?;
            (node.payload.clone(), Version::new(node.version))
        };
        let watch = self.arm_data_watch(&mut state, path);
        Ok((value, watch))
    }

    async fn get_children(&self, path: &NodePath) -> StoreResult<Vec<String>> {
        let state = self.state.lock();
        self.guard(&state)?;
        if !state.nodes.contains_key(path.as_str()) {
            return Err(StoreError::no_node(path.clone()));
        }
        Ok(children_of(&state, path.as_str()))
    }

    async fn get_children_watch(&self, path: &NodePath) -> StoreResult<(Vec<String>, NodeWatch)> {
        let mut state = self.state.lock();
        self.guard(&state)?;
        if !state.nodes.contains_key(path.as_str()) {
            return Err(StoreError::no_node(path.clone()));
        }
        let names = children_of(&state, path.as_str());
        let watch = self.arm_child_watch(&mut state, path);
        Ok((names, watch))
    }

    async fn delete(&self, path: &NodePath, expected: Version) -> StoreResult<()> {
        let mut state = self.state.lock();
        self.guard(&state)?;

        let current = match state.nodes.get(path.as_str()) {
            Some(node) => Version::new(node.version),
            None => return Err(StoreError::no_node(path.clone())),
        };
        if !expected.admits(current) {
            return Err(StoreError::version_mismatch(path.clone(), expected, current));
        }
        debug_assert!(
            children_of(&state, path.as_str()).is_empty(),
            "deleting a node with children is outside the recipe contract"
        );
        state.nodes.remove(path.as_str());

        fire_data_watches(&mut state, path.as_str(), EventKind::Deleted);
        if let Some(parent) = path.parent() {
            fire_child_watches(&mut state, parent.as_str());
        }
        Ok(())
    }

    fn session(&self) -> SessionState {
        self.state
            .lock()
            .sessions
            .get(&self.id)
            .copied()
            .unwrap_or(SessionState::Expired)
    }
}

/// Direct children names of `parent`, in lexicographic order.
fn children_of(state: &State, parent: &str) -> Vec<String> {
    state
        .nodes
        .keys()
        .filter(|key| key.as_str() != "/")
        .filter_map(|key| {
            let (key_parent, name) = split_key(key);
            (key_parent == parent).then(|| name.to_string())
        })
        .collect()
}

/// Split a stored path key into (parent, name).
fn split_key(key: &str) -> (&str, &str) {
    match key.rfind('/') {
        Some(0) => ("/", &key[1..]),
        Some(idx) => (&key[..idx], &key[idx + 1..]),
        None => ("/", key),
    }
}

/// Fire and consume every data watch armed on `path`.
fn fire_data_watches(state: &mut State, path: &str, kind: EventKind) {
    if let Some(regs) = state.data_watches.remove(path) {
        for reg in regs {
            reg.trigger.fire(kind);
        }
    }
}

/// Fire and consume every child watch armed on `parent`.
fn fire_child_watches(state: &mut State, parent: &str) {
    if let Some(regs) = state.child_watches.remove(parent) {
        for reg in regs {
            reg.trigger.fire(EventKind::ChildrenChanged);
        }
    }
}

/// Terminate a session: fail its pending watches, mark it dead, and (on
/// expiry) remove its ephemeral nodes, notifying survivors.
fn end_session(state: &mut State, id: SessionId, terminal: SessionState) {
    match state.sessions.get(&id) {
        Some(SessionState::Connected) => {}
        // Already dead (or never existed); nothing further to tear down.
        _ => return,
    }
    state.sessions.insert(id, terminal);
    let error = terminal
        .as_error()
        .unwrap_or(StoreError::SessionExpired);

    for reg in split_session_regs(&mut state.data_watches, id)
        .into_iter()
        .chain(split_session_regs(&mut state.child_watches, id))
    {
        reg.trigger.fail(error.clone());
    }

    if terminal == SessionState::Expired {
        let doomed: Vec<String> = state
            .nodes
            .iter()
            .filter(|(_, node)| node.owner == Some(id))
            .map(|(key, _)| key.clone())
            .collect();
        for key in doomed {
            state.nodes.remove(&key);
            fire_data_watches(state, &key, EventKind::Deleted);
            let (parent, _) = split_key(&key);
            fire_child_watches(state, parent);
        }
    }
}

/// Detach and return the watch registrations belonging to `id`.
fn split_session_regs(
    watches: &mut HashMap<String, Vec<WatchReg>>,
    id: SessionId,
) -> Vec<WatchReg> {
    let mut own = Vec::new();
    for regs in watches.values_mut() {
        let mut kept = Vec::with_capacity(regs.len());
        for reg in regs.drain(..) {
            if reg.session == id {
                own.push(reg);
            } else {
                kept.push(reg);
            }
        }
        *regs = kept;
    }
    own
}

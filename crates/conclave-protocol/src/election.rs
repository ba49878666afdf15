//! Leader election over atomic create-if-absent.
//!
//! A group of participants agrees on a single leader by racing to create one
//! ephemeral **leader node** under a shared group root. The store's atomic
//! create-if-absent is the sole arbiter: whoever's create lands first leads,
//! everyone else follows. No client-side comparison of identities or
//! timestamps exists, and leading needs no heartbeat: the leader node's
//! lifetime is the leader's session lifetime, so leader death is observed as
//! node deletion by every follower's watch.
//!
//! # State machine
//!
//! ```text
//! Init → Probing → { Leading | Following } → (leader node changed) → Probing
//! ```
//!
//! A probe reads the leader node with a watch armed. Present → follow the
//! payload's owner. Absent → attempt the create; losing the race re-reads to
//! pick up the winner. A follower suspends on its single live watch; both
//! `Created` and `Deleted` events funnel back to probing (deletion signals
//! leader loss, creation a new leader appearing before the watch re-armed),
//! and the next probe re-arms before acting, so there is no gap in which a
//! second change goes unobserved.
//!
//! Session loss is fatal to the participant's current epoch: it propagates
//! out of every operation here, and the caller restarts from `Init` on a
//! fresh session.

use crate::errors::{CoordinationError, CoordinationResult};
use crate::watch::{await_watch, Deadline};
use conclave_core::{CoordinationStore, CreateMode, NodePath, NodeWatch, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Name of the leader node under the group root.
const LEADER_NODE: &str = "leader";

/// Outcome of one probing step.
#[derive(Debug)]
pub enum Probe {
    /// This participant's create won; it is the leader for as long as its
    /// session lives.
    Leading,
    /// Another participant leads. Carries the leader's identity payload and
    /// the single live watch that fires when the leader node changes.
    Following {
        /// Identity payload the winner stored in the leader node
        leader: Vec<u8>,
        /// One-shot watch on the leader node
        watch: NodeWatch,
    },
}

impl Probe {
    /// Whether this participant came out of the probe as leader.
    pub fn is_leading(&self) -> bool {
        matches!(self, Self::Leading)
    }
}

/// One participant's handle on a named election group.
///
/// Each instance owns its store handle; nothing is shared between instances
/// except the store itself.
pub struct LeaderElection<S> {
    store: Arc<S>,
    group: NodePath,
    leader_path: NodePath,
    identity: Vec<u8>,
    root_ready: bool,
}

impl<S: CoordinationStore> LeaderElection<S> {
    /// Join the election group rooted at `group` with this participant's
    /// identity payload.
    pub fn new(
        store: Arc<S>,
        group: NodePath,
        identity: impl Into<Vec<u8>>,
    ) -> CoordinationResult<Self> {
        let leader_path = group.child(LEADER_NODE)?;
        Ok(Self {
            store,
            group,
            leader_path,
            identity: identity.into(),
            root_ready: false,
        })
    }

    /// This participant's identity payload.
    pub fn identity(&self) -> &[u8] {
        &self.identity
    }

    /// Path of the leader node this group races on.
    pub fn leader_path(&self) -> &NodePath {
        &self.leader_path
    }

    /// Read the current leader's identity without arming a watch.
    ///
    /// `None` means no leader is alive right now, an expected state while
    /// an election is in flight rather than an error.
    pub async fn current_leader(&self) -> CoordinationResult<Option<Vec<u8>>> {
        match self.store.get_data(&self.leader_path).await {
            Ok((payload, _)) => Ok(Some(payload)),
            Err(StoreError::NoNode { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Run one probing step: decide leader-or-follower for the current
    /// state of the group.
    ///
    /// Lazily creates the group root on first use. Losing the create race
    /// re-reads the leader node with a fresh watch; if the winner is already
    /// gone again by then, probing repeats.
    pub async fn probe(&mut self) -> CoordinationResult<Probe> {
        self.ensure_root().await?;
        loop {
            match self.store.get_data_watch(&self.leader_path).await {
                Ok(((leader, _version), watch)) => {
                    debug!(group = %self.group, "leader present; following");
                    return Ok(Probe::Following { leader, watch });
                }
                Err(StoreError::NoNode { .. }) => {}
                Err(e) => return Err(e.into()),
            }

            match self
                .store
                .create(&self.leader_path, &self.identity, CreateMode::Ephemeral)
                .await
            {
                Ok(_) => {
                    info!(group = %self.group, "acquired leadership");
                    return Ok(Probe::Leading);
                }
                Err(StoreError::NodeExists { .. }) => {
                    // Lost the race; loop back to read the winner.
                    debug!(group = %self.group, "lost leader create race; re-reading");
                }
                Err(e) if e.is_session_loss() => return Err(e.into()),
                Err(e) => return Err(CoordinationError::election_unavailable(e)),
            }
        }
    }

    /// Drive the state machine until this participant is leading, or the
    /// budget elapses.
    ///
    /// While following, the participant suspends on its single live watch;
    /// each change of the leader node funnels back to a fresh probe, which
    /// re-arms before deciding.
    pub async fn await_leadership(&mut self, timeout: Duration) -> CoordinationResult<()> {
        let deadline = Deadline::starting_now(timeout);
        loop {
            match self.probe().await? {
                Probe::Leading => return Ok(()),
                Probe::Following { watch, .. } => {
                    let event = await_watch(watch, &deadline, "leadership change").await?;
                    debug!(group = %self.group, kind = ?event.kind, "leader node changed; probing again");
                }
            }
        }
    }

    async fn ensure_root(&mut self) -> CoordinationResult<()> {
        if self.root_ready {
            return Ok(());
        }
        match self
            .store
            .create(&self.group, &[], CreateMode::Persistent)
            .await
        {
            Ok(_) | Err(StoreError::NodeExists { .. }) => {
                self.root_ready = true;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_testkit::MemoryStore;

    #[tokio::test]
    async fn sole_participant_leads() {
        let store = MemoryStore::new();
        let group = NodePath::new("/group").unwrap();
        let mut election =
            LeaderElection::new(Arc::new(store.connect()), group, b"only".to_vec()).unwrap();

        assert!(election.probe().await.unwrap().is_leading());
        assert_eq!(
            election.current_leader().await.unwrap(),
            Some(b"only".to_vec())
        );
    }

    #[tokio::test]
    async fn second_probe_follows_with_winner_identity() {
        let store = MemoryStore::new();
        let group = NodePath::new("/group").unwrap();
        let mut first =
            LeaderElection::new(Arc::new(store.connect()), group.clone(), b"A".to_vec()).unwrap();
        let mut second =
            LeaderElection::new(Arc::new(store.connect()), group, b"B".to_vec()).unwrap();

        assert!(first.probe().await.unwrap().is_leading());
        match second.probe().await.unwrap() {
            Probe::Following { leader, .. } => assert_eq!(leader, b"A".to_vec()),
            Probe::Leading => panic!("second probe must follow"),
        }
    }

    #[tokio::test]
    async fn probe_on_expired_session_propagates() {
        let store = MemoryStore::new();
        let session = Arc::new(store.connect());
        let group = NodePath::new("/group").unwrap();
        let mut election = LeaderElection::new(session.clone(), group, b"A".to_vec()).unwrap();

        session.expire();
        let err = election.probe().await.unwrap_err();
        assert!(err.is_session_loss());
    }
}

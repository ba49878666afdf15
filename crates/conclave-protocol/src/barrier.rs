//! Rendezvous barrier over ephemeral-sequential member nodes.
//!
//! A fixed-size cohort of participants blocks until all of them have joined,
//! then releases together. Joining creates one ephemeral **member node**
//! with a store-assigned ordinal under the barrier root; release is signaled
//! by a persistent **start marker** that exactly one participant manages to
//! create, namely whichever one's read of the member list first reaches the
//! cohort size. Every other participant's create attempt fails with
//! `NodeExists`, which is a release signal, not an error.
//!
//! # State machine
//!
//! ```text
//! Init → Joined → Waiting → Released
//! ```
//!
//! The start-marker watch is armed *before* joining, so the notification
//! that releases the blocked members can never fall in a gap. A session
//! re-established after loss makes a fresh attempt; the protocol does not
//! resume half-joined participants, does not support partial barriers or
//! late joiners after release, and requires a fresh root per round.

use crate::errors::{CoordinationError, CoordinationResult};
use crate::watch::{await_watch, Deadline};
use conclave_core::{CoordinationStore, CreateMode, EventKind, NodePath, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Name of the release marker under the barrier root.
const START_MARKER: &str = "start";

/// Prefix of member nodes; the store appends the sequence ordinal.
const MEMBER_PREFIX: &str = "member-";

/// Proof that the barrier released this participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Released {
    member: NodePath,
}

impl Released {
    /// This participant's member node, ordinal suffix included.
    pub fn member(&self) -> &NodePath {
        &self.member
    }

    /// The store-assigned join ordinal, usable for deterministic
    /// post-barrier role assignment.
    pub fn ordinal(&self) -> Option<u64> {
        self.member.sequence()
    }
}

/// One participant's handle on a fixed-size rendezvous barrier.
#[derive(Debug)]
pub struct Barrier<S> {
    store: Arc<S>,
    root: NodePath,
    start_path: NodePath,
    member_path: NodePath,
    cohort_size: usize,
    root_ready: bool,
}

impl<S: CoordinationStore> Barrier<S> {
    /// Join the barrier rooted at `root`, releasing once `cohort_size`
    /// members are present.
    pub fn new(store: Arc<S>, root: NodePath, cohort_size: usize) -> CoordinationResult<Self> {
        if cohort_size == 0 {
            return Err(CoordinationError::invalid_config(
                "barrier cohort size must be at least 1",
            ));
        }
        let start_path = root.child(START_MARKER)?;
        let member_path = root.child(MEMBER_PREFIX)?;
        Ok(Self {
            store,
            root,
            start_path,
            member_path,
            cohort_size,
            root_ready: false,
        })
    }

    /// The configured cohort size.
    pub fn cohort_size(&self) -> usize {
        self.cohort_size
    }

    /// Join the cohort and suspend until every member is present, or the
    /// budget elapses.
    ///
    /// Returns exactly once per call. Racing another participant's marker
    /// creation is normal: `NodeExists` on the marker create and a `Created`
    /// notification from the armed watch are both release signals.
    pub async fn enter(&mut self, timeout: Duration) -> CoordinationResult<Released> {
        let deadline = Deadline::starting_now(timeout);
        self.ensure_root().await?;

        // Arm the release watch before joining so the create-notification
        // cannot slip between the join and the first wait.
        let (marker, mut watch) = self.store.exists_watch(&self.start_path).await?;

        let member = self
            .store
            .create(&self.member_path, &[], CreateMode::EphemeralSequential)
            .await?;
        debug!(root = %self.root, member = %member, "joined barrier");

        if marker.is_some() {
            // Late probe of an already-satisfied barrier.
            debug!(root = %self.root, "start marker already present");
            return Ok(Released { member });
        }

        loop {
            let members = self.member_count().await?;
            if members >= self.cohort_size {
                match self
                    .store
                    .create(&self.start_path, &[], CreateMode::Persistent)
                    .await
                {
                    Ok(_) => {
                        info!(root = %self.root, members, "cohort complete; created start marker");
                        return Ok(Released { member });
                    }
                    Err(StoreError::NodeExists { .. }) => {
                        debug!(root = %self.root, "start marker raced; released");
                        return Ok(Released { member });
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            debug!(
                root = %self.root,
                members,
                cohort = self.cohort_size,
                "cohort incomplete; waiting for start marker"
            );
            let event = await_watch(watch, &deadline, "barrier release").await?;
            if event.kind == EventKind::Created {
                info!(root = %self.root, "released by start marker");
                return Ok(Released { member });
            }
            // Any other change: re-arm, then fall through to re-count.
            let (marker, rearmed) = self.store.exists_watch(&self.start_path).await?;
            watch = rearmed;
            if marker.is_some() {
                return Ok(Released { member });
            }
        }
    }

    async fn member_count(&self) -> CoordinationResult<usize> {
        let children = self.store.get_children(&self.root).await?;
        Ok(children
            .iter()
            .filter(|name| name.starts_with(MEMBER_PREFIX))
            .count())
    }

    async fn ensure_root(&mut self) -> CoordinationResult<()> {
        if self.root_ready {
            return Ok(());
        }
        match self
            .store
            .create(&self.root, &[], CreateMode::Persistent)
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

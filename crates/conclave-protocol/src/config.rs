//! Watch-driven config propagation.
//!
//! One logical writer publishes an opaque value to a persistent **config
//! node**; many readers observe updates through one-shot watches. The two
//! roles never communicate directly: the node's store-maintained version
//! counter serializes concurrent writers, and its change notifications drive
//! the readers.
//!
//! # Consistency contract
//!
//! Watches fire once, and there is an unavoidable gap between a notification
//! and the re-arming read that follows it. A reader therefore observes the
//! **latest value eventually** after updates settle; intermediate values may
//! be coalesced away. This is the documented contract, not an accident:
//! callers that need every intermediate value need a log, not a config node.

use crate::errors::{CoordinationError, CoordinationResult};
use crate::retry::RetryPolicy;
use crate::watch::{await_watch, Deadline};
use conclave_core::{
    CoordinationStore, CreateMode, EventKind, NodePath, NodeWatch, StoreError, Version,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// The writer role: version-guarded upserts with bounded retry.
///
/// Multiple writer processes may race; the version guard makes their updates
/// serializable per node. Transient contention (a stale version, a racing
/// create, the node vanishing between read and write) is retried per the
/// policy; session loss is never retried locally, because the writer's
/// notion of current state is no longer trustworthy.
#[derive(Debug)]
pub struct ConfigWriter<S> {
    store: Arc<S>,
    path: NodePath,
    policy: RetryPolicy,
}

impl<S: CoordinationStore> ConfigWriter<S> {
    /// A writer for the config node at `path`.
    pub fn new(store: Arc<S>, path: NodePath, policy: RetryPolicy) -> CoordinationResult<Self> {
        policy
            .validate()
            .map_err(CoordinationError::invalid_config)?;
        Ok(Self {
            store,
            path,
            policy,
        })
    }

    /// The config node this writer publishes to.
    pub fn path(&self) -> &NodePath {
        &self.path
    }

    /// Publish `value`, creating the node on first write.
    ///
    /// Returns the node's version after the write. Exhausting the retry
    /// budget surfaces [`CoordinationError::RetriesExhausted`] carrying the
    /// final contention error.
    pub async fn write(&self, value: &[u8]) -> CoordinationResult<Version> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.try_write(value).await {
                Ok(version) => {
                    debug!(path = %self.path, %version, attempts, "config written");
                    return Ok(version);
                }
                Err(e) if e.is_session_loss() => return Err(e.into()),
                Err(e) if e.is_contention() => {
                    if attempts >= self.policy.max_attempts {
                        warn!(path = %self.path, attempts, error = %e, "config write retries exhausted");
                        return Err(CoordinationError::RetriesExhausted { attempts, last: e });
                    }
                    debug!(path = %self.path, attempts, error = %e, "config write contended; retrying");
                    tokio::time::sleep(self.policy.delay_for(attempts)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// One upsert attempt: read the current version, then write through it.
    async fn try_write(&self, value: &[u8]) -> Result<Version, StoreError> {
        match self.store.exists(&self.path).await? {
            None => {
                self.store
                    .create(&self.path, value, CreateMode::Persistent)
                    .await?;
                Ok(Version::INITIAL)
            }
            Some(observed) => self.store.set_data(&self.path, value, observed).await,
        }
    }
}

/// The reader role: an always-watching view of one config node.
///
/// Every successful read re-arms a fresh watch before returning control, so
/// the reader is never blind to the next change. See the module docs for
/// what this does and does not guarantee.
pub struct ConfigReader<S> {
    store: Arc<S>,
    path: NodePath,
    watch: Option<NodeWatch>,
}

impl<S: CoordinationStore> ConfigReader<S> {
    /// A reader for the config node at `path`.
    pub fn new(store: Arc<S>, path: NodePath) -> Self {
        Self {
            store,
            path,
            watch: None,
        }
    }

    /// The config node this reader observes.
    pub fn path(&self) -> &NodePath {
        &self.path
    }

    /// Read the current value, arming a fresh watch.
    ///
    /// Fails with [`StoreError::NoNode`] while the writer has not yet
    /// published; use [`next_update`](Self::next_update) to wait for the
    /// first publication instead.
    pub async fn read(&mut self) -> CoordinationResult<(Vec<u8>, Version)> {
        let ((value, version), watch) = self.store.get_data_watch(&self.path).await?;
        self.watch = Some(watch);
        debug!(path = %self.path, %version, "config read");
        Ok((value, version))
    }

    /// Suspend until the config changes, then return the latest value.
    ///
    /// After an unarmed gap (the first call, or any call following a
    /// timeout) the reader cannot know whether it missed changes, so it
    /// resynchronizes by returning the node's current value. Deletion of the
    /// node is not an update; the reader keeps waiting for re-creation.
    pub async fn next_update(&mut self, timeout: Duration) -> CoordinationResult<(Vec<u8>, Version)> {
        let deadline = Deadline::starting_now(timeout);
        loop {
            if let Some(watch) = self.watch.take() {
                let event = await_watch(watch, &deadline, "config update").await?;
                match event.kind {
                    EventKind::Created | EventKind::DataChanged => match self.read().await {
                        Ok(latest) => return Ok(latest),
                        // Deleted again before the re-read; keep waiting.
                        Err(CoordinationError::Store(StoreError::NoNode { .. })) => {}
                        Err(e) => return Err(e),
                    },
                    EventKind::Deleted => {
                        debug!(path = %self.path, "config node deleted; awaiting re-creation");
                    }
                    EventKind::ChildrenChanged => {}
                }
                continue;
            }

            // No live watch: arm one on existence, which works whether or
            // not the node is there yet.
            let (present, watch) = self.store.exists_watch(&self.path).await?;
            if present.is_none() {
                self.watch = Some(watch);
                continue;
            }
            // The node exists and we were blind: resynchronize to latest.
            match self.read().await {
                Ok(latest) => return Ok(latest),
                Err(CoordinationError::Store(StoreError::NoNode { .. })) => {}
                Err(e) => return Err(e),
            }
        }
    }
}

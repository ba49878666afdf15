//! Conclave Core - Coordination Store Foundation
//!
//! Foundation layer for the Conclave coordination recipes. This crate holds
//! only the contract between the recipe protocols and their single external
//! collaborator (a hierarchical coordination store with atomic
//! create-if-absent, version-guarded writes, and single-fire watches), plus
//! the small pure types that cross that boundary.
//!
//! No protocol logic lives here. The recipes themselves (leader election,
//! synchronization barrier, config propagation) are in `conclave-protocol`;
//! a deterministic in-memory store for tests is in `conclave-testkit`.
//!
//! # Layout
//!
//! - [`path`]: validated absolute [`NodePath`]s and sequence-suffix parsing
//! - [`store`]: the [`CoordinationStore`] trait, node/watch/session types
//! - [`errors`]: the unified [`StoreError`] taxonomy

#![forbid(unsafe_code)]

/// Unified store error taxonomy
pub mod errors;

/// Validated node paths
pub mod path;

/// The coordination store contract and watch types
pub mod store;

pub use errors::{StoreError, StoreResult};
pub use path::{NodePath, PathError, SEQUENCE_DIGITS};
pub use store::{
    CoordinationStore, CreateMode, EventKind, NodeWatch, SessionState, Version, WatchEvent,
    WatchTrigger,
};

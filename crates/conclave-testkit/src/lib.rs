//! Conclave Testkit - Deterministic Test Infrastructure
//!
//! An in-memory [`MemoryStore`] implementing the full coordination store
//! contract, with injectable session failure, plus tracing helpers. Protocol
//! scenario tests drive multiple simulated participants against one shared
//! store and assert on the resulting tree.

#![forbid(unsafe_code)]

/// Test logging helpers
pub mod logging;

/// The in-memory coordination store
pub mod memory;

pub use logging::init_test_logging;
pub use memory::{MemorySession, MemoryStore, SessionId};

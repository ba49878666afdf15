//! Shared watch-wait plumbing.
//!
//! Every recipe suspends on one-shot watches under a caller-supplied time
//! budget. [`Deadline`] tracks the remaining budget across successive waits
//! within one logical operation; [`await_watch`] is the single suspension
//! point, mapping elapse to [`CoordinationError::Timeout`] and letting store
//! failures (including session loss) propagate unchanged.

use crate::errors::{CoordinationError, CoordinationResult};
use conclave_core::{NodeWatch, WatchEvent};
use std::time::Duration;
use tokio::time::Instant;

/// A fixed time budget shared by the waits of one logical operation.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    budget: Duration,
}

impl Deadline {
    /// Start a budget of `budget` from now.
    pub fn starting_now(budget: Duration) -> Self {
        Self {
            start: Instant::now(),
            budget,
        }
    }

    /// The budget this deadline was created with.
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Time left before the budget elapses; zero once it has.
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.start.elapsed())
    }

    /// Whether the budget has elapsed.
    pub fn is_elapsed(&self) -> bool {
        self.remaining().is_zero()
    }
}

/// Suspend on `watch` until it fires or `deadline` elapses.
///
/// `waiting_for` names the awaited condition in the timeout error. The watch
/// is consumed either way: after a timeout the caller must re-arm before
/// waiting again, and may have missed changes in the gap (the documented
/// coalescing behavior of one-shot watches).
pub async fn await_watch(
    watch: NodeWatch,
    deadline: &Deadline,
    waiting_for: &str,
) -> CoordinationResult<WatchEvent> {
    let remaining = deadline.remaining();
    if remaining.is_zero() {
        return Err(CoordinationError::timeout(waiting_for, deadline.budget()));
    }
    match tokio::time::timeout(remaining, watch.wait()).await {
        Ok(fired) => Ok(fired?),
        Err(_) => Err(CoordinationError::timeout(waiting_for, deadline.budget())),
    }
}

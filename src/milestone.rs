//! Lifecycle rendezvous between host callbacks and the driver thread.
//!
//! The host reports progress on its own callback thread, and that can happen before the
//! driver ever starts waiting. A one-shot signal would lose such an early notification, so
//! the tracker keeps a monotonic state and waiters compare against it with `>=`.

use crate::cancel::CancelToken;
use crate::lock_or_recover;
use std::fmt;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

/// Ordered lifecycle stages of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Milestone {
    NotStarted,
    HostReady,
    ProjectOpened,
    ConsoleReady,
}

impl Milestone {
    pub fn label(self) -> &'static str {
        match self {
            Milestone::NotStarted => "not-started",
            Milestone::HostReady => "host-ready",
            Milestone::ProjectOpened => "project-opened",
            Milestone::ConsoleReady => "console-ready",
        }
    }
}

impl fmt::Display for Milestone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Returned by [`MilestoneTracker::wait_for`] when the run is interrupted mid-wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitCancelled {
    pub target: Milestone,
    pub reached: Milestone,
}

pub struct MilestoneTracker {
    state: Mutex<Milestone>,
    poll_interval: Duration,
}

impl MilestoneTracker {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            state: Mutex::new(Milestone::NotStarted),
            poll_interval,
        }
    }

    pub fn current(&self) -> Milestone {
        *lock_or_recover(&self.state, "milestone read")
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Compare-and-set from callback context. A request whose `expected_from` does not match
    /// the current state is a no-op, which absorbs duplicate and reordered notifications.
    /// Backward transitions are refused even when `expected_from` matches.
    pub fn advance(&self, expected_from: Milestone, to: Milestone) -> bool {
        let mut state = lock_or_recover(&self.state, "milestone advance");
        if *state != expected_from || to <= *state {
            return false;
        }
        *state = to;
        tracing::debug!(from = %expected_from, to = %to, "Transitioned milestone");
        true
    }

    /// Block the driver thread until `target` has been reached. Returns immediately when the
    /// transition already happened. There is no timeout; only cancellation ends a wait early.
    pub fn wait_for(&self, target: Milestone, cancel: &CancelToken) -> Result<(), WaitCancelled> {
        loop {
            let reached = self.current();
            if reached >= target {
                return Ok(());
            }
            if cancel.is_cancelled() || !cancel.sleep(self.poll_interval) {
                return Err(WaitCancelled { target, reached });
            }
        }
    }
}

impl Default for MilestoneTracker {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

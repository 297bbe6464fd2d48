//! Deadline bookkeeping for auto-run timeouts.
//!
//! The timeout covers a whole run over all groups, measured from the dispatch
//! of the first group. Single-group runs are never timed.

use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct TimeoutSupervisor {
    deadline: Option<Instant>,
}

impl TimeoutSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the deadline for a run whose first group was dispatched at
    /// `dispatched_at`. Returns whether a deadline is now set.
    pub fn arm(
        &mut self,
        timeout: Option<Duration>,
        run_all_groups: bool,
        dispatched_at: Instant,
    ) -> bool {
        self.deadline = match timeout {
            Some(timeout) if run_all_groups => Some(dispatched_at + timeout),
            _ => None,
        };
        self.deadline.is_some()
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }
}

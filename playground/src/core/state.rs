//! Externally observable run state and its legal transitions.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// No dispatch pending; accepts `start`.
    Idle,
    /// A freshly spawned worker has not announced `ready` yet.
    Booting,
    /// A group is executing; accepts `stop`.
    Running,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunState::Idle => "idle",
            RunState::Booting => "booting",
            RunState::Running => "running",
        };
        f.write_str(label)
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// A run was requested. `worker_ready` is true when a live worker has
    /// already completed its handshake.
    Start { worker_ready: bool },
    /// The current worker completed its handshake. `run_queued` is true when
    /// a run was waiting for it.
    Ready { run_queued: bool },
    /// A group finished; `last` is true when no further group follows.
    GroupDone { last: bool },
    Stop,
    Timeout,
    /// The current worker crashed or closed its channel.
    Fault,
    /// Spawning kept failing; the engine gives up until the next `start`.
    BootFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal transition {transition:?} while {state}")]
pub struct StateError {
    pub state: RunState,
    pub transition: Transition,
}

impl RunState {
    /// Compute the next state, or reject the transition without changing anything.
    pub fn apply(self, transition: Transition) -> Result<RunState, StateError> {
        use RunState::{Booting, Idle, Running};
        let next = match (self, transition) {
            (Idle, Transition::Start { worker_ready: true }) => Running,
            (Idle, Transition::Start { worker_ready: false }) => Booting,
            // Queued until the handshake completes.
            (Booting, Transition::Start { .. }) => Booting,
            (Booting, Transition::Ready { run_queued: true }) => Running,
            (Booting, Transition::Ready { run_queued: false }) => Idle,
            (Running, Transition::GroupDone { last: true }) => Idle,
            (Running, Transition::GroupDone { last: false }) => Running,
            (Running, Transition::Stop | Transition::Timeout | Transition::Fault) => Booting,
            (Idle | Booting, Transition::Fault) => Booting,
            (Booting, Transition::BootFailed) => Idle,
            (state, transition) => return Err(StateError { state, transition }),
        };
        Ok(next)
    }
}

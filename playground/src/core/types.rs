//! Shared deterministic types for engine core logic.
//!
//! These types define stable contracts between the engine, its sinks, and the
//! UI layer. They serialize with lowercase/snake_case tags so the HTTP server
//! can forward them unchanged.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::state::RunState;

/// Why a run ended before its last group finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminateReason {
    /// The caller asked the engine to stop.
    Terminated,
    /// The run exceeded its timeout.
    TimedOut,
    /// The worker crashed, closed its channel, or could not be started.
    WorkerFault,
}

impl fmt::Display for TerminateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TerminateReason::Terminated => "terminated",
            TerminateReason::TimedOut => "timed out",
            TerminateReason::WorkerFault => "aborted abnormally",
        };
        f.write_str(label)
    }
}

/// Read-only view of engine state published to the UI layer.
///
/// `succeeded` mirrors the per-group flags of the active run, or of the most
/// recent run once it has ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineSnapshot {
    pub state: RunState,
    pub active_group: Option<usize>,
    pub succeeded: Vec<bool>,
    /// Generation of the live worker, if one exists.
    pub generation: Option<u64>,
}

impl Default for EngineSnapshot {
    fn default() -> Self {
        Self {
            state: RunState::Idle,
            active_group: None,
            succeeded: Vec::new(),
            generation: None,
        }
    }
}

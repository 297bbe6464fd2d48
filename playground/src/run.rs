//! One-shot run: start an engine, stream rendered output, report how it ended.

use std::io::Write;

use anyhow::{Context, Result, anyhow};
use tokio::sync::mpsc;
use tracing::{info, instrument};

use crate::core::types::TerminateReason;
use crate::engine::{Engine, EngineEvent, EngineOptions, RunRequest};
use crate::io::worker::WorkerSpawner;
use crate::terminal;

/// How a one-shot run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// `None` when every requested group completed.
    pub terminated: Option<TerminateReason>,
    /// Per-group success flags, in group order.
    pub succeeded: Vec<bool>,
    pub elapsed_ms: Option<u64>,
}

/// Run `request` to completion on a fresh engine, writing rendered events to
/// `out` as they arrive.
#[instrument(skip_all, fields(groups = request.groups.len(), selected = ?request.selected_group))]
pub async fn run_session<S: WorkerSpawner, W: Write>(
    spawner: S,
    options: EngineOptions,
    request: RunRequest,
    out: &mut W,
    color: bool,
) -> Result<RunOutcome> {
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let engine = Engine::spawn(spawner, options, events_tx);
    let mut outcome = RunOutcome {
        terminated: None,
        succeeded: vec![false; request.groups.len()],
        elapsed_ms: None,
    };

    engine.start(request).await.context("start run")?;

    while let Some(event) = events.recv().await {
        if let Some(text) = terminal::render(&event, color) {
            out.write_all(text.as_bytes()).context("write output")?;
            out.flush().context("flush output")?;
        }
        match event {
            // Only uninterrupted groups report completion.
            EngineEvent::GroupFinished {
                index: Some(index), ..
            } => {
                if let Some(flag) = outcome.succeeded.get_mut(index) {
                    *flag = true;
                }
            }
            EngineEvent::RunFinished { elapsed_ms } => {
                outcome.elapsed_ms = Some(elapsed_ms);
                break;
            }
            EngineEvent::Terminated { reason } => {
                outcome.terminated = Some(reason);
                break;
            }
            _ => {}
        }
    }
    engine.shutdown().await;

    if outcome.elapsed_ms.is_none() && outcome.terminated.is_none() {
        return Err(anyhow!("engine stopped before the run finished"));
    }
    info!(terminated = ?outcome.terminated, "run ended");
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::test_support::{CRASH, LOOP, ScriptedSpawner, abc_session};

    #[tokio::test]
    async fn streams_all_groups() {
        let session = abc_session("echo");
        let request = RunRequest::from_session(&session, None, None);
        let mut out = Vec::new();
        let outcome = run_session(
            ScriptedSpawner::new(),
            EngineOptions::default(),
            request,
            &mut out,
            false,
        )
        .await
        .expect("run");

        assert_eq!(outcome.terminated, None);
        assert_eq!(outcome.succeeded, vec![true, true, true]);
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.starts_with("Running group: A\necho:1\necho:2\n"));
        assert!(text.contains("Running group: B\necho\n"));
        assert!(text.contains("Execution completed in"));
    }

    #[tokio::test(start_paused = true)]
    async fn reports_timeout() {
        let session = abc_session(LOOP);
        let request = RunRequest::from_session(&session, None, Some(Duration::from_secs(5)));
        let mut out = Vec::new();
        let outcome = run_session(
            ScriptedSpawner::new(),
            EngineOptions::default(),
            request,
            &mut out,
            false,
        )
        .await
        .expect("run");
        assert_eq!(outcome.terminated, Some(TerminateReason::TimedOut));
        assert!(String::from_utf8(out).expect("utf8").contains("Execution timed out"));
    }

    #[tokio::test]
    async fn reports_worker_fault() {
        let session = abc_session(CRASH);
        let request = RunRequest::from_session(&session, Some(2), None);
        let mut out = Vec::new();
        let outcome = run_session(
            ScriptedSpawner::new(),
            EngineOptions::default(),
            request,
            &mut out,
            false,
        )
        .await
        .expect("run");
        assert_eq!(outcome.terminated, Some(TerminateReason::WorkerFault));
        assert_eq!(outcome.succeeded, vec![false, false, false]);
    }
}

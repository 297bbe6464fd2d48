//! Execution session engine.
//!
//! A single tokio task (the actor) exclusively owns the worker handle, the
//! generation guard, the active run and the timeout. Callers talk to it through
//! the cloneable [`Engine`] handle; output and lifecycle notifications leave it
//! as an ordered [`EngineEvent`] stream, and a derived [`EngineSnapshot`] is
//! published on a watch channel.
//!
//! Event ordering: events are sent in the order the actor observes them. Output
//! chunks of one group always precede that group's `GroupFinished`, which
//! precedes the next `GroupStarted`.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::core::generation::{GenerationGuard, Tagged};
use crate::core::output::{DEFAULT_OUTPUT_BUDGET_CHARS, OutputBuffer};
use crate::core::scheduler::{Advance, Dispatch, GroupScheduler, RunPlan, SchedulerError};
use crate::core::session::{InputGroup, Session};
use crate::core::state::{RunState, Transition};
use crate::core::timeout::TimeoutSupervisor;
use crate::core::types::{EngineSnapshot, TerminateReason};
use crate::io::worker::{
    InboundReceiver, InboundSender, WorkerEvent, WorkerHandle, WorkerRequest, WorkerSpawner,
};

/// Notification delivered to the terminal sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    StateChanged {
        state: RunState,
    },
    RunStarted {
        groups: usize,
    },
    GroupStarted {
        index: usize,
        name: String,
    },
    /// `index` is `None` for the implicit run of a session without groups.
    GroupFinished {
        index: Option<usize>,
        elapsed_ms: u64,
    },
    RunFinished {
        elapsed_ms: u64,
    },
    Stdout {
        text: String,
    },
    Stderr {
        text: String,
    },
    Notice {
        text: String,
    },
    Terminated {
        reason: TerminateReason,
    },
}

/// Caller-facing errors. Engine-internal faults never surface here; they
/// become state transitions and events instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("attempted to start while running")]
    AlreadyRunning,
    #[error("a run is already waiting for the worker to boot")]
    RunQueued,
    #[error("attempted to stop while {0}")]
    NotRunning(RunState),
    #[error("group {index} out of range ({len} groups)")]
    InvalidGroup { index: usize, len: usize },
    #[error("engine is shut down")]
    Closed,
}

impl From<SchedulerError> for EngineError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::InvalidGroup { index, len } => EngineError::InvalidGroup { index, len },
        }
    }
}

/// A request to run a program over input groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub code: String,
    pub flags: Vec<String>,
    pub groups: Vec<InputGroup>,
    /// Run only this group; `None` runs all groups in order.
    pub selected_group: Option<usize>,
    /// Whole-run timeout for auto-runs. Ignored for single-group runs.
    pub timeout: Option<Duration>,
}

impl RunRequest {
    /// Snapshot `session` into a request. The program is header + code + footer.
    pub fn from_session(
        session: &Session,
        selected_group: Option<usize>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            code: session.program(),
            flags: session.flags.clone(),
            groups: session.input_groups.clone(),
            selected_group,
            timeout,
        }
    }

    fn into_plan(self) -> RunPlan {
        RunPlan {
            code: self.code,
            flags: self.flags,
            groups: self.groups,
            selected_group: self.selected_group,
            timeout: self.timeout,
        }
    }
}

/// Tunables for the actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    pub output_budget_chars: usize,
    /// Consecutive spawn/boot failures tolerated before giving up.
    pub max_boot_failures: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            output_budget_chars: DEFAULT_OUTPUT_BUDGET_CHARS,
            max_boot_failures: 3,
        }
    }
}

enum Command {
    Start {
        request: RunRequest,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Stop {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Output {
        reply: oneshot::Sender<String>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to the engine actor.
#[derive(Clone)]
pub struct Engine {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<EngineSnapshot>,
}

impl Engine {
    /// Start the actor on the current tokio runtime. No worker is spawned
    /// until the first `start`.
    pub fn spawn<S: WorkerSpawner>(
        spawner: S,
        options: EngineOptions,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(EngineSnapshot::default());
        let actor = Actor {
            spawner,
            output: OutputBuffer::new(options.output_budget_chars),
            options,
            events,
            snapshot: snapshot_tx,
            inbound: inbound_tx,
            guard: GenerationGuard::new(),
            worker: None,
            state: RunState::Idle,
            run: None,
            queued: None,
            timeout: TimeoutSupervisor::new(),
            boot_failures: 0,
            last_succeeded: Vec::new(),
        };
        tokio::spawn(actor.run(command_rx, inbound_rx));
        Self {
            commands: command_tx,
            snapshot: snapshot_rx,
        }
    }

    /// Start a run. Accepted runs may be queued behind a booting worker.
    pub async fn start(&self, request: RunRequest) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start { request, reply }).await?;
        rx.await.map_err(|_| EngineError::Closed)?
    }

    /// Terminate the active run and respawn the worker.
    pub async fn stop(&self) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stop { reply }).await?;
        rx.await.map_err(|_| EngineError::Closed)?
    }

    /// Recent stdout of the current or last run, bounded by the output budget.
    pub async fn buffered_output(&self) -> Result<String, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Output { reply }).await?;
        rx.await.map_err(|_| EngineError::Closed)
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshot.clone()
    }

    /// Wait until the published state equals `state`.
    pub async fn wait_for_state(&self, state: RunState) -> Result<EngineSnapshot, EngineError> {
        let mut rx = self.snapshot.clone();
        let snapshot = rx
            .wait_for(|snapshot| snapshot.state == state)
            .await
            .map_err(|_| EngineError::Closed)?;
        Ok(snapshot.clone())
    }

    /// Kill the worker and stop the actor.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Shutdown { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    async fn send(&self, command: Command) -> Result<(), EngineError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| EngineError::Closed)
    }
}

struct Actor<S> {
    spawner: S,
    options: EngineOptions,
    events: mpsc::UnboundedSender<EngineEvent>,
    snapshot: watch::Sender<EngineSnapshot>,
    inbound: InboundSender,
    guard: GenerationGuard,
    worker: Option<WorkerHandle>,
    state: RunState,
    run: Option<GroupScheduler>,
    queued: Option<RunPlan>,
    timeout: TimeoutSupervisor,
    output: OutputBuffer,
    boot_failures: u32,
    last_succeeded: Vec<bool>,
}

impl<S: WorkerSpawner> Actor<S> {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>, mut inbound: InboundReceiver) {
        loop {
            let deadline = self.timeout.deadline().map(Instant::from_std);
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.teardown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.teardown();
                        break;
                    }
                },
                Some(tagged) = inbound.recv() => self.handle_inbound(tagged),
                () = expire(deadline) => self.on_timeout(),
            }
        }
        debug!("engine actor stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { request, reply } => {
                let _ = reply.send(self.start(request));
            }
            Command::Stop { reply } => {
                let _ = reply.send(self.stop());
            }
            Command::Output { reply } => {
                let _ = reply.send(self.output.contents());
            }
            Command::Shutdown { reply } => {
                self.teardown();
                let _ = reply.send(());
            }
        }
    }

    #[instrument(skip_all, fields(groups = request.groups.len(), selected = ?request.selected_group))]
    fn start(&mut self, request: RunRequest) -> Result<(), EngineError> {
        let plan = request.into_plan();
        let worker_ready = self.worker.as_ref().is_some_and(WorkerHandle::is_ready);
        let next = self
            .state
            .apply(Transition::Start { worker_ready })
            .map_err(|_| EngineError::AlreadyRunning)?;
        plan.validate()?;
        if self.queued.is_some() {
            return Err(EngineError::RunQueued);
        }

        self.set_state(next);
        if worker_ready {
            self.begin_run(plan);
            return Ok(());
        }

        debug!("queueing run until the worker is ready");
        self.queued = Some(plan);
        if self.worker.is_none() {
            self.spawn_worker();
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        if self.state != RunState::Running {
            return Err(EngineError::NotRunning(self.state));
        }
        info!("stopping run");
        self.terminate(TerminateReason::Terminated);
        Ok(())
    }

    /// Expects the state to have moved to `running` already.
    fn begin_run(&mut self, plan: RunPlan) {
        let now = Instant::now().into_std();
        let timeout = plan.timeout;
        let group_count = plan.groups.len();
        let (scheduler, dispatch) = match GroupScheduler::begin(plan, now) {
            Ok(started) => started,
            Err(e) => {
                // Plans are validated on `start`.
                warn!(err = %e, "dropping invalid run");
                self.emit(EngineEvent::Notice {
                    text: e.to_string(),
                });
                self.set_state(RunState::Idle);
                return;
            }
        };
        self.output.clear();
        if self.timeout.arm(timeout, scheduler.cursor().run_all_groups, now) {
            debug!(timeout_ms = timeout.map_or(0, duration_ms), "timeout armed");
        }
        self.run = Some(scheduler);
        self.emit(EngineEvent::RunStarted {
            groups: group_count,
        });
        self.dispatch(dispatch);
    }

    fn dispatch(&mut self, dispatch: Dispatch) {
        if self.worker.is_none() {
            error!("dispatch without a live worker");
            return;
        }
        if let (Some(index), Some(name)) = (dispatch.group, dispatch.group_name.clone()) {
            self.emit(EngineEvent::GroupStarted { index, name });
        }
        let Some(worker) = self.worker.as_mut() else {
            return;
        };
        let generation = worker.generation();
        debug!(generation = %generation, group = ?dispatch.group, inputs = dispatch.inputs.len(), "dispatching run");
        let request = WorkerRequest::Run {
            code: dispatch.code,
            flags: dispatch.flags,
            inputs: dispatch.inputs,
            generation: generation.get(),
        };
        if let Err(e) = worker.dispatch(request) {
            warn!(generation = %generation, err = %e, "dispatch failed");
            self.on_fault(e.to_string());
            return;
        }
        self.publish();
    }

    fn handle_inbound(&mut self, tagged: Tagged<WorkerEvent>) {
        let Some(event) = self.guard.admit(tagged) else {
            return;
        };
        match event {
            WorkerEvent::Ready => self.on_ready(),
            WorkerEvent::Started => debug!("worker started executing"),
            WorkerEvent::Stdout(text) => {
                self.output.push(&text);
                self.emit(EngineEvent::Stdout { text });
            }
            WorkerEvent::Stderr(text) => self.emit(EngineEvent::Stderr { text }),
            WorkerEvent::Notice(text) => self.emit(EngineEvent::Notice { text }),
            WorkerEvent::Done => self.on_done(),
            WorkerEvent::Exited { detail } => self.on_fault(detail),
        }
    }

    fn on_ready(&mut self) {
        let Some(worker) = self.worker.as_mut() else {
            return;
        };
        if worker.is_ready() {
            warn!(generation = %worker.generation(), "duplicate ready from worker");
            return;
        }
        worker.mark_ready();
        info!(generation = %worker.generation(), "worker is ready");
        self.boot_failures = 0;
        let run_queued = self.queued.is_some();
        self.transition(Transition::Ready { run_queued });
        if let Some(plan) = self.queued.take() {
            self.begin_run(plan);
        }
    }

    fn on_done(&mut self) {
        if self.state != RunState::Running {
            warn!(state = %self.state, "done received outside of a run");
            return;
        }
        let Some(run) = self.run.as_mut() else {
            warn!("done received without an active run");
            return;
        };
        let finished_group = run.cursor().active_group;
        let (elapsed, advance) = run.on_done(Instant::now().into_std());
        self.emit(EngineEvent::GroupFinished {
            index: finished_group,
            elapsed_ms: duration_ms(elapsed),
        });
        match advance {
            Advance::Next(dispatch) => self.dispatch(dispatch),
            Advance::Finished { run_elapsed } => {
                self.timeout.cancel();
                if let Some(run) = self.run.take() {
                    self.last_succeeded = run.succeeded();
                }
                info!(elapsed_ms = duration_ms(run_elapsed), "run completed");
                self.emit(EngineEvent::RunFinished {
                    elapsed_ms: duration_ms(run_elapsed),
                });
                self.transition(Transition::GroupDone { last: true });
            }
        }
    }

    fn on_timeout(&mut self) {
        if !self.timeout.is_expired(Instant::now().into_std()) {
            return;
        }
        self.timeout.cancel();
        if self.state == RunState::Running {
            info!("run timed out");
            self.terminate(TerminateReason::TimedOut);
        }
    }

    fn on_fault(&mut self, detail: String) {
        match self.state {
            RunState::Running => {
                warn!(detail = %detail, "worker fault during run");
                self.emit(EngineEvent::Notice { text: detail });
                self.terminate(TerminateReason::WorkerFault);
            }
            RunState::Booting => {
                self.boot_failures += 1;
                warn!(detail = %detail, failures = self.boot_failures, "worker died before ready");
                if let Some(worker) = self.worker.take() {
                    worker.terminate();
                }
                if self.boot_failures >= self.options.max_boot_failures {
                    self.give_up(detail);
                } else {
                    self.spawn_worker();
                }
            }
            RunState::Idle => {
                warn!(detail = %detail, "idle worker exited, respawning");
                if let Some(worker) = self.worker.take() {
                    worker.terminate();
                }
                self.transition(Transition::Fault);
                self.spawn_worker();
            }
        }
    }

    /// Hard-stop the active run: kill the worker, advance the generation and
    /// spawn a replacement.
    fn terminate(&mut self, reason: TerminateReason) {
        if let Some(mut run) = self.run.take() {
            run.interrupt();
            self.last_succeeded = run.succeeded();
        }
        self.timeout.cancel();
        if let Some(worker) = self.worker.take() {
            worker.terminate();
        }
        self.emit(EngineEvent::Terminated { reason });
        self.transition(match reason {
            TerminateReason::Terminated => Transition::Stop,
            TerminateReason::TimedOut => Transition::Timeout,
            TerminateReason::WorkerFault => Transition::Fault,
        });
        self.spawn_worker();
    }

    fn spawn_worker(&mut self) {
        loop {
            let generation = self.guard.advance();
            match self.spawner.spawn(generation, self.inbound.clone()) {
                Ok(channel) => {
                    info!(generation = %generation, "spawned worker");
                    self.worker = Some(WorkerHandle::new(generation, channel));
                    self.publish();
                    return;
                }
                Err(e) => {
                    self.boot_failures += 1;
                    warn!(generation = %generation, err = %e, failures = self.boot_failures, "worker spawn failed");
                    if self.boot_failures >= self.options.max_boot_failures {
                        self.give_up(e.to_string());
                        return;
                    }
                }
            }
        }
    }

    /// Settle in `idle` without a worker; the next `start` spawns again.
    fn give_up(&mut self, detail: String) {
        error!(detail = %detail, "worker failed to start, giving up");
        self.boot_failures = 0;
        self.worker = None;
        self.emit(EngineEvent::Notice {
            text: format!("worker failed to start: {detail}"),
        });
        if self.queued.take().is_some() {
            self.emit(EngineEvent::Terminated {
                reason: TerminateReason::WorkerFault,
            });
        }
        self.transition(Transition::BootFailed);
    }

    fn teardown(&mut self) {
        self.timeout.cancel();
        self.run = None;
        self.queued = None;
        if let Some(worker) = self.worker.take() {
            worker.terminate();
        }
    }

    fn transition(&mut self, transition: Transition) {
        match self.state.apply(transition) {
            Ok(next) => self.set_state(next),
            Err(e) => error!(err = %e, "rejected state transition"),
        }
    }

    fn set_state(&mut self, state: RunState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "state changed");
            self.state = state;
            self.emit(EngineEvent::StateChanged { state });
        }
        self.publish();
    }

    fn publish(&self) {
        let (active_group, succeeded) = match &self.run {
            Some(run) => (run.cursor().active_group, run.succeeded()),
            None => (None, self.last_succeeded.clone()),
        };
        self.snapshot.send_replace(EngineSnapshot {
            state: self.state,
            active_group,
            succeeded,
            generation: self.worker.as_ref().map(|w| w.generation().get()),
        });
    }

    fn emit(&self, event: EngineEvent) {
        // The sink is append-only; a dropped receiver just means nobody listens.
        let _ = self.events.send(event);
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

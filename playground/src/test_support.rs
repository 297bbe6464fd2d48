//! Test-only helpers: a scripted in-memory worker and session builders.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::core::generation::{Generation, Tagged};
use crate::core::session::{InputGroup, Session};
use crate::io::worker::{
    InboundSender, WorkerChannel, WorkerError, WorkerEvent, WorkerRequest, WorkerSpawner,
};

/// Program text the scripted worker never finishes.
pub const LOOP: &str = "loop";
/// Program text that makes the scripted worker exit mid-run.
pub const CRASH: &str = "crash";
/// Program text that waits for the test to inject frames.
pub const MANUAL: &str = "manual";

/// In-memory [`WorkerSpawner`] with deterministic behavior keyed on the code.
///
/// Any other program echoes `{code}:{input}` per input line (or `{code}` when
/// there are no inputs) and then reports `done`. Clones share state, so a test
/// can keep one clone for inspection after moving the other into the engine.
#[derive(Clone, Default)]
pub struct ScriptedSpawner {
    state: Arc<Mutex<ScriptState>>,
}

#[derive(Default)]
struct ScriptState {
    manual_ready: bool,
    fail_spawns: u32,
    crash_boots: u32,
    fail_dispatches: u32,
    spawned: Vec<Generation>,
    dispatched: Vec<(Generation, WorkerRequest)>,
    terminated: Vec<Generation>,
    senders: HashMap<Generation, InboundSender>,
}

impl ScriptedSpawner {
    /// Workers announce `ready` as soon as they are spawned.
    pub fn new() -> Self {
        Self::default()
    }

    /// Workers stay booting until [`release_ready`](Self::release_ready).
    pub fn manual_ready() -> Self {
        let spawner = Self::default();
        spawner.lock().manual_ready = true;
        spawner
    }

    /// Make the next `count` spawn attempts fail.
    pub fn fail_next_spawns(&self, count: u32) {
        self.lock().fail_spawns = count;
    }

    /// Make the next `count` workers exit before announcing `ready`.
    pub fn crash_next_boots(&self, count: u32) {
        self.lock().crash_boots = count;
    }

    /// Make the next `count` dispatches fail as if the worker's stdin closed.
    pub fn fail_next_dispatches(&self, count: u32) {
        self.lock().fail_dispatches = count;
    }

    pub fn release_ready(&self, generation: Generation) {
        self.inject(generation, WorkerEvent::Ready);
    }

    /// Deliver `event` as if the worker of `generation` had produced it, even
    /// if that worker has since been terminated.
    pub fn inject(&self, generation: Generation, event: WorkerEvent) {
        if let Some(sender) = self.lock().senders.get(&generation) {
            let _ = sender.send(Tagged::new(generation, event));
        }
    }

    pub fn spawned(&self) -> Vec<Generation> {
        self.lock().spawned.clone()
    }

    pub fn latest(&self) -> Option<Generation> {
        self.lock().spawned.last().copied()
    }

    pub fn dispatched(&self) -> Vec<(Generation, WorkerRequest)> {
        self.lock().dispatched.clone()
    }

    /// Inputs of every dispatched run, in dispatch order.
    pub fn dispatched_inputs(&self) -> Vec<Vec<String>> {
        self.lock()
            .dispatched
            .iter()
            .map(|(_, WorkerRequest::Run { inputs, .. })| inputs.clone())
            .collect()
    }

    pub fn terminated(&self) -> Vec<Generation> {
        self.lock().terminated.clone()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().expect("script state poisoned")
    }
}

impl WorkerSpawner for ScriptedSpawner {
    fn spawn(
        &mut self,
        generation: Generation,
        inbound: InboundSender,
    ) -> Result<Box<dyn WorkerChannel>, WorkerError> {
        let mut state = self.lock();
        if state.fail_spawns > 0 {
            state.fail_spawns -= 1;
            return Err(WorkerError::Spawn {
                program: "scripted".to_string(),
                source: std::io::Error::other("scripted spawn failure"),
            });
        }
        state.spawned.push(generation);
        state.senders.insert(generation, inbound.clone());
        if state.crash_boots > 0 {
            state.crash_boots -= 1;
            let _ = inbound.send(Tagged::new(
                generation,
                WorkerEvent::Exited {
                    detail: "scripted boot crash".to_string(),
                },
            ));
        } else if !state.manual_ready {
            let _ = inbound.send(Tagged::new(generation, WorkerEvent::Ready));
        }
        Ok(Box::new(ScriptedChannel {
            generation,
            inbound,
            state: Arc::clone(&self.state),
        }))
    }
}

struct ScriptedChannel {
    generation: Generation,
    inbound: InboundSender,
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedChannel {
    fn send(&self, event: WorkerEvent) {
        let _ = self.inbound.send(Tagged::new(self.generation, event));
    }
}

impl WorkerChannel for ScriptedChannel {
    fn dispatch(&mut self, request: WorkerRequest) -> Result<(), WorkerError> {
        {
            let mut state = self.state.lock().expect("script state poisoned");
            if state.fail_dispatches > 0 {
                state.fail_dispatches -= 1;
                return Err(WorkerError::ChannelClosed);
            }
            state.dispatched.push((self.generation, request.clone()));
        }

        let WorkerRequest::Run { code, inputs, .. } = request;
        match code.as_str() {
            LOOP | MANUAL => self.send(WorkerEvent::Started),
            CRASH => {
                self.send(WorkerEvent::Started);
                self.send(WorkerEvent::Exited {
                    detail: "worker exited with status 101".to_string(),
                });
            }
            _ => {
                self.send(WorkerEvent::Started);
                if inputs.is_empty() {
                    self.send(WorkerEvent::Stdout(format!("{code}\n")));
                }
                for input in &inputs {
                    self.send(WorkerEvent::Stdout(format!("{code}:{input}\n")));
                }
                self.send(WorkerEvent::Done);
            }
        }
        Ok(())
    }

    fn terminate(&mut self) {
        self.state
            .lock()
            .expect("script state poisoned")
            .terminated
            .push(self.generation);
    }
}

/// Session with `code` and the given `(name, inputs)` groups.
pub fn session(code: &str, groups: &[(&str, &[&str])]) -> Session {
    Session {
        code: code.to_string(),
        input_groups: groups
            .iter()
            .map(|(name, inputs)| InputGroup::new(*name, inputs.iter().copied()))
            .collect(),
        interpreter_version: "3.4.1".to_string(),
        ..Session::default()
    }
}

/// The three-group session used across engine tests: `A(2), B(0), C(1)`.
pub fn abc_session(code: &str) -> Session {
    session(code, &[("A", &["1", "2"]), ("B", &[]), ("C", &["3"])])
}

//! Worker channel: one external interpreter process per generation.
//!
//! The worker speaks newline-delimited JSON. The engine writes `run` requests
//! to its stdin; the worker answers with `ready`, `started`, output chunks and
//! `done` on stdout. Each worker's reader task tags every frame with the
//! worker's generation before pushing it into the engine's shared inbound
//! queue, and synthesizes an `Exited` event when stdout closes.

use std::process::Stdio;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, error, instrument, warn};

use crate::core::generation::{Generation, Tagged};

/// Request sent to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerRequest {
    Run {
        code: String,
        flags: Vec<String>,
        inputs: Vec<String>,
        generation: u64,
    },
}

/// Frame written by the worker on stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerFrame {
    Ready,
    Started,
    Stdout { text: String },
    Stderr { text: String },
    #[serde(alias = "worker-notice")]
    Notice { text: String },
    Done,
}

/// Everything the engine can learn from a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Ready,
    Started,
    Stdout(String),
    Stderr(String),
    Notice(String),
    Done,
    /// The worker's output channel closed (crash, kill, or clean exit).
    Exited { detail: String },
}

impl From<WorkerFrame> for WorkerEvent {
    fn from(frame: WorkerFrame) -> Self {
        match frame {
            WorkerFrame::Ready => WorkerEvent::Ready,
            WorkerFrame::Started => WorkerEvent::Started,
            WorkerFrame::Stdout { text } => WorkerEvent::Stdout(text),
            WorkerFrame::Stderr { text } => WorkerEvent::Stderr(text),
            WorkerFrame::Notice { text } => WorkerEvent::Notice(text),
            WorkerFrame::Done => WorkerEvent::Done,
        }
    }
}

/// Shared queue every worker reader pushes into.
pub type InboundSender = mpsc::UnboundedSender<Tagged<WorkerEvent>>;
pub type InboundReceiver = mpsc::UnboundedReceiver<Tagged<WorkerEvent>>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker command is empty")]
    EmptyCommand,
    #[error("failed to spawn worker `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("worker {0} pipe was not captured")]
    MissingPipe(&'static str),
    #[error("worker channel closed")]
    ChannelClosed,
    #[error("encode worker request: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Creates workers. Production code spawns processes; tests script them.
pub trait WorkerSpawner: Send + 'static {
    /// Start a worker for `generation`. Its frames must be pushed to `inbound`
    /// tagged with that same generation.
    fn spawn(
        &mut self,
        generation: Generation,
        inbound: InboundSender,
    ) -> Result<Box<dyn WorkerChannel>, WorkerError>;
}

/// Outbound half of a live worker.
pub trait WorkerChannel: Send {
    fn dispatch(&mut self, request: WorkerRequest) -> Result<(), WorkerError>;

    /// Destroy the worker outright. Must not block.
    fn terminate(&mut self);
}

/// The engine's exclusive handle on the current worker.
pub struct WorkerHandle {
    generation: Generation,
    channel: Box<dyn WorkerChannel>,
    ready: bool,
}

impl WorkerHandle {
    pub fn new(generation: Generation, channel: Box<dyn WorkerChannel>) -> Self {
        Self {
            generation,
            channel,
            ready: false,
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// True once the worker has completed its `ready` handshake.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn mark_ready(&mut self) {
        self.ready = true;
    }

    pub fn dispatch(&mut self, request: WorkerRequest) -> Result<(), WorkerError> {
        self.channel.dispatch(request)
    }

    /// Consume the handle and kill the worker. Handles are never reused.
    pub fn terminate(mut self) {
        debug!(generation = %self.generation, "terminating worker");
        self.channel.terminate();
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("generation", &self.generation)
            .field("ready", &self.ready)
            .finish_non_exhaustive()
    }
}

/// Spawns the configured interpreter command as a child process.
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    command: Vec<String>,
}

impl ProcessSpawner {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl WorkerSpawner for ProcessSpawner {
    #[instrument(skip_all, fields(generation = %generation))]
    fn spawn(
        &mut self,
        generation: Generation,
        inbound: InboundSender,
    ) -> Result<Box<dyn WorkerChannel>, WorkerError> {
        let (program, args) = self.command.split_first().ok_or(WorkerError::EmptyCommand)?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(program = %program, "spawning worker process");
        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                error!(err = %e, "failed to spawn worker");
                return Err(WorkerError::Spawn {
                    program: program.clone(),
                    source: e,
                });
            }
        };

        let stdin = child.stdin.take().ok_or(WorkerError::MissingPipe("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(WorkerError::MissingPipe("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(WorkerError::MissingPipe("stderr"))?;

        let (request_tx, request_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_requests(stdin, request_rx, generation));
        tokio::spawn(read_frames(stdout, inbound.clone(), generation));
        tokio::spawn(read_stderr(stderr, inbound, generation));

        Ok(Box::new(ProcessChannel {
            child,
            requests: request_tx,
        }))
    }
}

struct ProcessChannel {
    child: Child,
    requests: mpsc::UnboundedSender<String>,
}

impl WorkerChannel for ProcessChannel {
    fn dispatch(&mut self, request: WorkerRequest) -> Result<(), WorkerError> {
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');
        self.requests
            .send(line)
            .map_err(|_| WorkerError::ChannelClosed)
    }

    fn terminate(&mut self) {
        if let Err(e) = self.child.start_kill() {
            // Already exited; the reader reports the exit.
            debug!(err = %e, "worker kill failed");
        }
    }
}

async fn write_requests(
    mut stdin: ChildStdin,
    mut requests: mpsc::UnboundedReceiver<String>,
    generation: Generation,
) {
    while let Some(line) = requests.recv().await {
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        if let Err(e) = written {
            warn!(generation = %generation, err = %e, "failed to write worker request");
            break;
        }
    }
}

async fn read_frames<R>(stdout: R, inbound: InboundSender, generation: Generation)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stdout).lines();
    let detail = loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                let event = parse_frame(&line);
                if inbound.send(Tagged::new(generation, event)).is_err() {
                    // Engine is gone; nothing left to report to.
                    return;
                }
            }
            Ok(None) => break "worker closed its output".to_string(),
            Err(e) => break format!("failed to read worker output: {e}"),
        }
    };
    debug!(generation = %generation, detail = %detail, "worker output ended");
    let _ = inbound.send(Tagged::new(generation, WorkerEvent::Exited { detail }));
}

async fn read_stderr<R>(stderr: R, inbound: InboundSender, generation: Generation)
where
    R: AsyncRead + Unpin,
{
    // Split on raw bytes so one invalid UTF-8 line does not end the stream.
    let mut segments = BufReader::new(stderr).split(b'\n');
    loop {
        match segments.next_segment().await {
            Ok(Some(bytes)) => {
                let mut line = String::from_utf8_lossy(&bytes).into_owned();
                line.push('\n');
                if inbound
                    .send(Tagged::new(generation, WorkerEvent::Stderr(line)))
                    .is_err()
                {
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                warn!(generation = %generation, err = %e, "failed to read worker stderr");
                return;
            }
        }
    }
}

/// Decode one stdout line. Lines that are not protocol frames are surfaced as
/// notices so a misbehaving interpreter stays visible.
pub fn parse_frame(line: &str) -> WorkerEvent {
    match serde_json::from_str::<WorkerFrame>(line) {
        Ok(frame) => frame.into(),
        Err(e) => {
            warn!(err = %e, "worker wrote a non-protocol line");
            WorkerEvent::Notice(line.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_request_serializes_with_type_tag() {
        let request = WorkerRequest::Run {
            code: "1+".to_string(),
            flags: vec!["j".to_string()],
            inputs: vec!["2".to_string()],
            generation: 3,
        };
        let json = serde_json::to_value(&request).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({
                "type": "run",
                "code": "1+",
                "flags": ["j"],
                "inputs": ["2"],
                "generation": 3
            })
        );
    }

    #[test]
    fn parses_protocol_frames() {
        assert_eq!(parse_frame(r#"{"type":"ready"}"#), WorkerEvent::Ready);
        assert_eq!(
            parse_frame(r#"{"type":"stdout","text":"hi\n"}"#),
            WorkerEvent::Stdout("hi\n".to_string())
        );
        assert_eq!(
            parse_frame(r#"{"type":"worker-notice","text":"loading"}"#),
            WorkerEvent::Notice("loading".to_string())
        );
        assert_eq!(parse_frame(r#"{"type":"done"}"#), WorkerEvent::Done);
    }

    #[test]
    fn non_protocol_lines_become_notices() {
        assert_eq!(
            parse_frame("segfault?"),
            WorkerEvent::Notice("segfault?".to_string())
        );
    }

    #[tokio::test]
    async fn stderr_survives_invalid_utf8() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let generation = Generation::new(2);
        let raw: &[u8] = b"first\n\xff\xfe oops\nlast\n";
        read_stderr(raw, tx, generation).await;

        let mut lines = Vec::new();
        while let Ok(tagged) = rx.try_recv() {
            assert_eq!(tagged.generation, generation);
            let WorkerEvent::Stderr(text) = tagged.message else {
                panic!("expected stderr");
            };
            lines.push(text);
        }
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "first\n");
        assert!(lines[1].ends_with(" oops\n"));
        assert_eq!(lines[2], "last\n");
    }

    #[test]
    fn empty_command_is_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = ProcessSpawner::new(Vec::new())
            .spawn(Generation::new(1), tx)
            .err()
            .expect("empty command");
        assert!(matches!(err, WorkerError::EmptyCommand));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_worker_handshakes_and_reports_exit() {
        let script = r#"echo '{"type":"ready"}'; read line; echo '{"type":"started"}'; echo '{"type":"stdout","text":"ok"}'; echo '{"type":"done"}'"#;
        let mut spawner =
            ProcessSpawner::new(vec!["sh".to_string(), "-c".to_string(), script.to_string()]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let generation = Generation::new(7);
        let mut channel = spawner.spawn(generation, tx).expect("spawn");

        let first = rx.recv().await.expect("ready");
        assert_eq!(first, Tagged::new(generation, WorkerEvent::Ready));

        channel
            .dispatch(WorkerRequest::Run {
                code: String::new(),
                flags: Vec::new(),
                inputs: Vec::new(),
                generation: generation.get(),
            })
            .expect("dispatch");

        let mut events = Vec::new();
        while let Some(tagged) = rx.recv().await {
            assert_eq!(tagged.generation, generation);
            let exited = matches!(tagged.message, WorkerEvent::Exited { .. });
            events.push(tagged.message);
            if exited {
                break;
            }
        }
        assert_eq!(events[0], WorkerEvent::Started);
        assert_eq!(events[1], WorkerEvent::Stdout("ok".to_string()));
        assert_eq!(events[2], WorkerEvent::Done);
        assert!(matches!(events[3], WorkerEvent::Exited { .. }));
    }
}

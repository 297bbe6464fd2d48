//! Shared application state for the UI server.

use std::sync::Arc;

use playground::engine::{Engine, EngineEvent};
use playground::io::config::EngineConfig;
use playground::io::worker::WorkerSpawner;
use playground::permalink::CompatTable;
use tokio::sync::{broadcast, mpsc};

use crate::sse;

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The one execution engine every client drives.
    pub engine: Engine,
    pub config: Arc<EngineConfig>,
    pub compat: Arc<CompatTable>,
    /// Engine events fanned out to SSE clients.
    pub event_tx: Arc<broadcast::Sender<EngineEvent>>,
}

impl AppState {
    /// Start the engine and the task that fans its events out to subscribers.
    pub fn new<S: WorkerSpawner>(spawner: S, config: EngineConfig, compat: CompatTable) -> Self {
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let engine = Engine::spawn(spawner, config.engine_options(), engine_tx);
        let (event_tx, _) = broadcast::channel(256);
        let event_tx = Arc::new(event_tx);
        sse::start_event_forwarder(engine_rx, Arc::clone(&event_tx));
        Self {
            engine,
            config: Arc::new(config),
            compat: Arc::new(compat),
            event_tx,
        }
    }
}

//! Server-Sent Events stream of engine events.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use playground::engine::EngineEvent;
use playground::terminal;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::state::AppState;

/// SSE endpoint handler.
///
/// Every engine event is sent as an `engine` event carrying its JSON form,
/// followed by a `terminal` event with the rendered ANSI text when the event
/// has a terminal representation.
pub async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.event_tx.subscribe();
    let snapshot = state.engine.snapshot();

    let stream = async_stream::stream! {
        // Initial state so late subscribers can render without polling.
        if let Ok(event) = Event::default().event("connected").json_data(&snapshot) {
            yield Ok(event);
        }

        loop {
            match rx.recv().await {
                Ok(engine_event) => {
                    for event in sse_events(&engine_event) {
                        yield Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "SSE client lagged, some events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn sse_events(engine_event: &EngineEvent) -> Vec<Event> {
    let mut events = Vec::with_capacity(2);
    match Event::default().event("engine").json_data(engine_event) {
        Ok(event) => events.push(event),
        Err(e) => warn!(err = %e, "failed to encode engine event"),
    }
    // JSON-encoded so carriage returns in program output stay intact.
    if let Some(text) = terminal::render(engine_event, true)
        && let Ok(event) = Event::default().event("terminal").json_data(text)
    {
        events.push(event);
    }
    events
}

/// Forward engine events to SSE subscribers in a background task.
pub fn start_event_forwarder(
    mut engine_rx: mpsc::UnboundedReceiver<EngineEvent>,
    event_tx: Arc<broadcast::Sender<EngineEvent>>,
) {
    tokio::spawn(async move {
        while let Some(event) = engine_rx.recv().await {
            // No subscribers is fine; events are not replayed.
            let _ = event_tx.send(event);
        }
        debug!("engine event stream closed");
    });
}

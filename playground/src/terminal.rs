//! Terminal rendering of engine events.
//!
//! Produces the text a terminal emulator shows for each event: program output
//! verbatim, stderr in red, notices dimmed and lifecycle banners around groups
//! and runs. With `color` off the same text is produced without escape codes.

use crate::engine::EngineEvent;

const RESET: &str = "\x1b[0m";
const BRIGHT_GREEN: &str = "\x1b[92m";
const BOLD_GREEN: &str = "\x1b[1;92m";
const BOLD_RED: &str = "\x1b[1;31m";
const RED: &str = "\x1b[31m";
const DIM: &str = "\x1b[2m";
const FAINT: &str = "\x1b[0;2m";
/// Cursor to column 0, so banners start on a clean line after partial output.
const COLUMN_ZERO: &str = "\x1b[0G";

/// Render `event`, or `None` for events with no terminal representation.
pub fn render(event: &EngineEvent, color: bool) -> Option<String> {
    let paint = |style: &str, text: &str| {
        if color {
            format!("{style}{text}{RESET}")
        } else {
            text.to_string()
        }
    };
    let column_zero = if color { COLUMN_ZERO } else { "" };

    let text = match event {
        EngineEvent::StateChanged { .. } | EngineEvent::RunStarted { .. } => return None,
        // Implicit run of a session without groups: no boundaries.
        EngineEvent::GroupFinished { index: None, .. } => return None,
        EngineEvent::Stdout { text } => text.clone(),
        EngineEvent::Stderr { text } => paint(RED, text),
        EngineEvent::Notice { text } => format!("{}\n", paint(DIM, text)),
        EngineEvent::GroupStarted { name, .. } => {
            format!("{}\n", paint(BRIGHT_GREEN, &format!("Running group: {name}")))
        }
        EngineEvent::GroupFinished {
            elapsed_ms,
            index: Some(_),
        } => format!(
            "\n{column_zero}{}\n",
            paint(FAINT, &format!("Finished in {} seconds", seconds(*elapsed_ms)))
        ),
        EngineEvent::RunFinished { elapsed_ms } => format!(
            "{} in {} seconds\n",
            paint(BOLD_GREEN, "Execution completed"),
            seconds(*elapsed_ms)
        ),
        EngineEvent::Terminated { reason } => format!(
            "\n{column_zero}-------\n{}\n",
            paint(BOLD_RED, &format!("Execution {reason}"))
        ),
    };
    Some(text)
}

fn seconds(elapsed_ms: u64) -> f64 {
    elapsed_ms as f64 / 1000.0
}

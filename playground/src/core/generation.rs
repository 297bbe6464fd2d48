//! Worker generations and the guard that discards stale messages.
//!
//! Termination is asynchronous: a killed worker can still have frames in
//! flight after its replacement has been spawned. Every frame is therefore
//! tagged with the generation of the worker that produced it, and only frames
//! from the current generation are admitted.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Identifies one worker's lifetime. Strictly increasing, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Generation(u64);

impl Generation {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message together with the generation it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tagged<T> {
    pub generation: Generation,
    pub message: T,
}

impl<T> Tagged<T> {
    pub fn new(generation: Generation, message: T) -> Self {
        Self {
            generation,
            message,
        }
    }
}

/// Tracks the current generation. The first call to [`advance`](Self::advance)
/// yields generation 1.
#[derive(Debug, Default)]
pub struct GenerationGuard {
    current: Option<Generation>,
}

impl GenerationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move to the next generation and return it.
    pub fn advance(&mut self) -> Generation {
        let next = Generation(self.current.map_or(1, |g| g.0 + 1));
        self.current = Some(next);
        next
    }

    pub fn current(&self) -> Option<Generation> {
        self.current
    }

    pub fn is_current(&self, generation: Generation) -> bool {
        self.current == Some(generation)
    }

    /// Unwrap `tagged` if it belongs to the current generation.
    pub fn admit<T>(&self, tagged: Tagged<T>) -> Option<T> {
        if self.is_current(tagged.generation) {
            Some(tagged.message)
        } else {
            debug!(
                generation = %tagged.generation,
                current = ?self.current.map(Generation::get),
                "discarding message from stale worker"
            );
            None
        }
    }
}

//! Execution engine and permalink codec for an interactive code playground.
//!
//! The crate separates pure logic from side effects:
//!
//! - **[`core`]**: Deterministic building blocks (run state machine, group
//!   scheduling, generations, timeouts, output buffering, session model).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting pieces (worker processes, config and session
//!   files). Isolated behind traits so tests can script the worker.
//!
//! [`engine`] ties the core together in a single tokio task; [`permalink`]
//! turns sessions into shareable tokens. [`run`], [`share`] and [`terminal`]
//! implement the CLI commands on top of them.

pub mod core;
pub mod engine;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod permalink;
pub mod run;
pub mod share;
pub mod terminal;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

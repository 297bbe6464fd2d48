//! Deterministic, pure logic shared by the playground engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and take timestamps as arguments so tests can drive them
//! without a clock or a worker process.

pub mod generation;
pub mod output;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod timeout;
pub mod types;

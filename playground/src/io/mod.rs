//! I/O helpers: worker processes, config and on-disk documents.

pub mod compat_file;
pub mod config;
pub mod session_file;
pub mod worker;

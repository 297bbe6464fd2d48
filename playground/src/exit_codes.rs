//! Stable exit codes for playground CLI commands.

/// Command succeeded; a run completed every group it was asked to run.
pub const OK: i32 = 0;
/// Invalid arguments, config, session file, or other errors.
pub const INVALID: i32 = 1;
/// The permalink needs an archived interpreter build.
pub const INCOMPATIBLE: i32 = 2;
/// The permalink could not be decoded or is not a permalink record.
pub const UNPARSEABLE: i32 = 3;
/// The run was terminated (timed out, stopped, or the worker failed).
pub const TERMINATED: i32 = 4;

//! Stable exit codes for monitor CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid config or arguments, or any other failure.
pub const INVALID: i32 = 1;
/// Another live monitor owns the `(root, project)` scope.
pub const LOCKED: i32 = 2;
/// `monitor stop` gave up waiting for the run to exit.
pub const STOP_TIMEOUT: i32 = 3;

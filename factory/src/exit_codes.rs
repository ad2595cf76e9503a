//! Stable exit codes for factory CLI commands.

/// Command succeeded, or the run finished with `ok: true`.
pub const OK: i32 = 0;
/// Invalid usage, unreadable input, or a broken workspace layout/config.
pub const INVALID: i32 = 1;
/// The run (or capability check) completed and reported failure.
pub const FAILED: i32 = 2;
/// A capability could not be resolved or has no registered implementation.
pub const WIRING: i32 = 3;

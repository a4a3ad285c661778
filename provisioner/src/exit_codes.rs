//! Stable exit codes for provisioner CLI commands.

/// The run completed (or a plan/dry-run printed successfully).
pub const OK: i32 = 0;
/// Invalid usage, config, lock contention, or other setup failure.
pub const INVALID: i32 = 1;
/// The run aborted at a fatal step; the step name is reported on stderr.
pub const ABORTED: i32 = 2;

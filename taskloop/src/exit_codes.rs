//! Stable exit codes for taskloop CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Command failed: bad arguments, missing task, unreadable vault or config.
pub const INVALID: i32 = 1;
/// `taskloop health` ran but at least one check failed.
pub const DEGRADED: i32 = 2;

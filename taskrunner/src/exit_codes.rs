//! Stable exit codes for taskrunner CLI commands.

/// Command succeeded, an item was selected, or a run finished its work.
pub const OK: i32 = 0;
/// Invalid config or checklist, stage error, or any other hard failure.
pub const INVALID: i32 = 1;
/// `taskrunner next` found no pending item.
pub const COMPLETE: i32 = 2;
/// Pending items remain but none is eligible.
pub const BLOCKED: i32 = 3;
/// A run stopped on an item failure or the iteration limit.
pub const STOPPED: i32 = 4;

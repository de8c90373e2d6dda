//! Dependency-ordered work item runner.
//!
//! Reads a markdown checklist of work items, picks the next item whose
//! dependencies are complete, hands it to an agent, gates completion on
//! verification commands and retries with feedback up to a fixed number of
//! attempts.
//!
//! - **[`core`]**: Pure, deterministic logic (parsing, selection, cycle
//!   detection, the repair state machine). No I/O.
//! - **[`io`]**: Side effects (filesystem, subprocesses, git).
//! - **[`pipeline`]**: The configurable stage pipeline that ties them
//!   together.
//!
//! [`select`] and [`check`] back the read-only CLI commands.

pub mod check;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod select;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

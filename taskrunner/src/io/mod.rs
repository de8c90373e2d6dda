//! Side-effecting helpers: filesystem, subprocesses, git.

pub mod agent;
pub mod checklist;
pub mod config;
pub mod constraints;
pub mod git;
pub mod init;
pub mod process;
pub mod progress;
pub mod prompt;
pub mod verify;

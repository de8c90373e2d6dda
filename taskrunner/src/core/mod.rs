//! Deterministic, pure logic shared by the pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod catalog;
pub mod constraints;
pub mod graph;
pub mod ids;
pub mod repair;
pub mod signal;
pub mod types;

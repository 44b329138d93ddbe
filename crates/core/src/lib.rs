//! Domain types and pure logic for prompt allocation and batch execution.
//!
//! Nothing in this crate performs I/O. Storage lives in `tunefleet-db`,
//! execution in `tunefleet-pipeline`, and the remote service client in
//! `tunefleet-studio`.

pub mod backoff;
pub mod batching;
pub mod error;
pub mod history;
pub mod pacing;
pub mod prompt;
pub mod queue;
pub mod types;

//! Splitting an entry's remaining prompts into bounded-size batches.
//!
//! Batches are transient: they are recomputed from the entry's durable
//! `completed_count` on every run, which is what makes resume correct.

use crate::queue::{PromptRange, QueueEntry};

/// One ordered slice of an entry's remaining prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch {
    /// Zero-based position within this run's plan for the entry.
    pub index: u32,
    /// Prompt pool indices covered by this batch.
    pub range: PromptRange,
}

/// Partition `remaining` into consecutive batches of at most `batch_size`
/// prompts. The final batch may be smaller. A zero `batch_size` is treated
/// as one.
pub fn split_range(remaining: PromptRange, batch_size: u32) -> Vec<Batch> {
    let size = batch_size.max(1);
    let mut batches = Vec::with_capacity(remaining.len().div_ceil(size) as usize);
    let mut start = remaining.start;
    let mut index = 0;
    while start < remaining.end {
        let end = (start + size).min(remaining.end);
        batches.push(Batch {
            index,
            range: PromptRange::new(start, end),
        });
        start = end;
        index += 1;
    }
    batches
}

/// Batches covering everything `entry` has not completed yet.
pub fn plan_batches(entry: &QueueEntry) -> Vec<Batch> {
    split_range(entry.remaining_range(), entry.songs_per_batch)
}

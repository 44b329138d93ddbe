use tunefleet_core::types::QueueId;
use tunefleet_db::StoreError;

/// Why an allocation request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationErrorKind {
    /// `total_songs` or `songs_per_batch` out of range.
    InvalidCounts,
    EmptyPool,
    /// A different pool was supplied while entries still reference the
    /// stored one.
    PoolMismatch,
    InsufficientPrompts,
    /// Enough free slots in total, but no single gap is large enough.
    NoContiguousRange,
}

impl AllocationErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidCounts => "invalid_counts",
            Self::EmptyPool => "empty_pool",
            Self::PoolMismatch => "pool_mismatch",
            Self::InsufficientPrompts => "insufficient_prompts",
            Self::NoContiguousRange => "no_contiguous_range",
        }
    }
}

impl std::fmt::Display for AllocationErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rejected `add_queue_entry`. Never leaves partial state behind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Allocation rejected ({kind}): {detail} (requested {requested}, available {available})")]
pub struct AllocationError {
    pub kind: AllocationErrorKind,
    pub requested: u32,
    pub available: u32,
    pub detail: String,
}

impl AllocationError {
    pub fn new(
        kind: AllocationErrorKind,
        requested: u32,
        available: u32,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            requested,
            available,
            detail: detail.into(),
        }
    }
}

/// Errors from ledger mutations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error("Ledger persistence failed: {0}")]
    Persistence(#[from] StoreError),
}

/// Errors that end a whole run.
///
/// Per-item failures and dead sessions are absorbed into the
/// [`RunReport`](crate::engine::RunReport); only a failed progress write
/// stops the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Progress write failed for entry {entry_id}: {source}")]
    Persistence {
        entry_id: QueueId,
        #[source]
        source: StoreError,
    },
}

//! Queue entry model: a fixed allocation of a contiguous prompt range to one
//! account, tracked to completion.
//!
//! Invariants carried by every [`QueueEntry`]:
//! - `completed_count <= total_songs`
//! - `status == Completed` exactly when `completed_count == total_songs`
//! - `prompt_range.len() == total_songs`

use std::ops::Range;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{QueueId, Timestamp};

// ---------------------------------------------------------------------------
// QueueStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Paused,
}

impl QueueStatus {
    /// String representation used in snapshots and events.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Paused => "paused",
        }
    }

    /// Human-readable label for display.
    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::InProgress => "In Progress",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Paused => "Paused",
        }
    }

    /// Candidate for (re)selection by the user: pending or in progress.
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PromptRange
// ---------------------------------------------------------------------------

/// Half-open interval `[start, end)` into a prompt pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PromptRange {
    pub start: u32,
    pub end: u32,
}

impl PromptRange {
    pub fn new(start: u32, end: u32) -> Self {
        debug_assert!(start <= end, "range start must not exceed end");
        Self { start, end }
    }

    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if the two ranges share at least one prompt index.
    pub fn overlaps(&self, other: &PromptRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn as_usize_range(&self) -> Range<usize> {
        self.start as usize..self.end as usize
    }
}

impl std::fmt::Display for PromptRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

// ---------------------------------------------------------------------------
// QueueEntry
// ---------------------------------------------------------------------------

/// A fixed allocation of `total_songs` prompts to one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: QueueId,
    pub account_ref: String,
    pub total_songs: u32,
    pub songs_per_batch: u32,
    pub prompt_range: PromptRange,
    pub completed_count: u32,
    pub status: QueueStatus,
    pub created_at: Timestamp,
}

impl QueueEntry {
    /// Create a fresh pending entry covering `prompt_range`.
    ///
    /// Counts are validated by [`validate_entry_counts`]; the range length
    /// must equal `total_songs`.
    pub fn new(
        account_ref: impl Into<String>,
        total_songs: u32,
        songs_per_batch: u32,
        prompt_range: PromptRange,
    ) -> Result<Self, CoreError> {
        validate_entry_counts(total_songs, songs_per_batch)?;
        if prompt_range.len() != total_songs {
            return Err(CoreError::Validation(format!(
                "Prompt range {prompt_range} does not cover {total_songs} prompts"
            )));
        }
        Ok(Self {
            id: uuid::Uuid::new_v4(),
            account_ref: account_ref.into(),
            total_songs,
            songs_per_batch,
            prompt_range,
            completed_count: 0,
            status: QueueStatus::Pending,
            created_at: Utc::now(),
        })
    }

    /// The sub-range not yet completed: `[start + completed_count, end)`.
    pub fn remaining_range(&self) -> PromptRange {
        let done = self.completed_count.min(self.total_songs);
        PromptRange::new(self.prompt_range.start + done, self.prompt_range.end)
    }

    pub fn remaining(&self) -> u32 {
        self.total_songs.saturating_sub(self.completed_count)
    }

    pub fn is_complete(&self) -> bool {
        self.completed_count >= self.total_songs
    }

    /// Completion as an integer percentage (0-100).
    pub fn progress_percent(&self) -> u8 {
        progress_percent(self.completed_count, self.total_songs)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate the per-entry counts: `total_songs > 0` and
/// `1 <= songs_per_batch <= total_songs`.
pub fn validate_entry_counts(total_songs: u32, songs_per_batch: u32) -> Result<(), CoreError> {
    if total_songs == 0 {
        return Err(CoreError::Validation(
            "total_songs must be greater than zero".to_string(),
        ));
    }
    if songs_per_batch == 0 {
        return Err(CoreError::Validation(
            "songs_per_batch must be greater than zero".to_string(),
        ));
    }
    if songs_per_batch > total_songs {
        return Err(CoreError::Validation(format!(
            "songs_per_batch ({songs_per_batch}) cannot exceed total_songs ({total_songs})"
        )));
    }
    Ok(())
}

/// Integer completion percentage, `0` when `total` is zero, capped at 100.
pub fn progress_percent(completed: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (u64::from(completed) * 100) / u64::from(total);
    pct.min(100) as u8
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

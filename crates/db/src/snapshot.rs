//! The persisted form of the allocation ledger.

use serde::{Deserialize, Serialize};
use tunefleet_core::prompt::Prompt;
use tunefleet_core::queue::{validate_entry_counts, QueueEntry, QueueStatus};
use tunefleet_core::types::Timestamp;

/// Schema version written into every snapshot.
pub const SNAPSHOT_VERSION: &str = "1.0";

/// Full ledger state: the prompt pool plus every queue entry in creation
/// order. Written whole after each mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawSnapshot")]
pub struct LedgerSnapshot {
    pub version: String,
    pub prompts: Vec<Prompt>,
    pub queues: Vec<QueueEntry>,
    pub last_updated: Option<Timestamp>,
}

impl Default for LedgerSnapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION.to_string(),
            prompts: Vec::new(),
            queues: Vec::new(),
            last_updated: None,
        }
    }
}

/// Lenient wire shape: queue entries are parsed one by one so a single bad
/// record does not make the whole ledger unreadable.
#[derive(Deserialize)]
struct RawSnapshot {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    prompts: Vec<Prompt>,
    #[serde(default)]
    queues: Vec<serde_json::Value>,
    #[serde(default)]
    last_updated: Option<Timestamp>,
}

impl From<RawSnapshot> for LedgerSnapshot {
    fn from(raw: RawSnapshot) -> Self {
        let queues = raw
            .queues
            .into_iter()
            .enumerate()
            .filter_map(|(position, value)| match parse_entry(value) {
                Ok(entry) => Some(entry),
                Err(reason) => {
                    tracing::warn!(position, %reason, "Skipping malformed queue entry");
                    None
                }
            })
            .collect();

        Self {
            version: raw.version.unwrap_or_else(|| SNAPSHOT_VERSION.to_string()),
            prompts: raw.prompts,
            queues,
            last_updated: raw.last_updated,
        }
    }
}

fn parse_entry(value: serde_json::Value) -> Result<QueueEntry, String> {
    let mut entry: QueueEntry = serde_json::from_value(value).map_err(|e| e.to_string())?;
    validate_entry_counts(entry.total_songs, entry.songs_per_batch).map_err(|e| e.to_string())?;
    if entry.prompt_range.start > entry.prompt_range.end
        || entry.prompt_range.len() != entry.total_songs
    {
        return Err(format!(
            "range {} does not match total_songs {}",
            entry.prompt_range, entry.total_songs
        ));
    }

    // Restore the completion invariant for hand-edited files.
    if entry.completed_count >= entry.total_songs {
        entry.completed_count = entry.total_songs;
        entry.status = QueueStatus::Completed;
    } else if entry.status == QueueStatus::Completed {
        entry.status = QueueStatus::Paused;
    }
    Ok(entry)
}

//! Value types for the two append-mostly histories kept beside the ledger:
//! per-prompt creation records and the per-account download dedup ledger.
//!
//! Neither is progress state. Losing a write here never affects resume.

use std::collections::HashSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Creation records
// ---------------------------------------------------------------------------

/// Outcome of a single prompt submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationStatus {
    /// The service accepted the prompt and returned an artifact id.
    Success,
    /// The form was filled but not submitted, awaiting manual action.
    Pending,
    Failed,
}

impl CreationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Pending => "pending",
            Self::Failed => "failed",
        }
    }
}

/// Operator-facing record of one prompt outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreationRecord {
    #[serde(default)]
    pub artifact_ref: Option<String>,
    pub title: String,
    pub prompt_index: u32,
    pub account_ref: String,
    pub status: CreationStatus,
    pub created_at: Timestamp,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl CreationRecord {
    pub fn success(
        account_ref: impl Into<String>,
        prompt_index: u32,
        title: impl Into<String>,
        artifact_ref: Option<String>,
    ) -> Self {
        let status = if artifact_ref.is_some() {
            CreationStatus::Success
        } else {
            CreationStatus::Pending
        };
        Self {
            artifact_ref,
            title: title.into(),
            prompt_index,
            account_ref: account_ref.into(),
            status,
            created_at: Utc::now(),
            error_message: None,
        }
    }

    pub fn failure(
        account_ref: impl Into<String>,
        prompt_index: u32,
        title: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            artifact_ref: None,
            title: title.into(),
            prompt_index,
            account_ref: account_ref.into(),
            status: CreationStatus::Failed,
            created_at: Utc::now(),
            error_message: Some(reason.into()),
        }
    }

    /// Case-insensitive match against title, artifact id or status.
    /// An empty keyword matches everything.
    pub fn matches_keyword(&self, keyword: &str) -> bool {
        if keyword.is_empty() {
            return true;
        }
        let needle = keyword.to_lowercase();
        self.title.to_lowercase().contains(&needle)
            || self
                .artifact_ref
                .as_deref()
                .is_some_and(|a| a.to_lowercase().contains(&needle))
            || self.status.as_str().contains(&needle)
    }
}

// ---------------------------------------------------------------------------
// Download dedup ledger
// ---------------------------------------------------------------------------

/// Per-account record of artifacts already retrieved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadHistory {
    pub account_ref: String,
    /// Clip ids in download order.
    #[serde(default)]
    pub downloaded_ids: Vec<String>,
    #[serde(default)]
    pub total_downloaded: u32,
    #[serde(default)]
    pub last_download: Option<Timestamp>,
    /// Feed page to continue from on the next incremental download.
    #[serde(default = "first_page")]
    pub current_page: u32,
    #[serde(default)]
    pub last_profile: String,
}

fn first_page() -> u32 {
    1
}

impl DownloadHistory {
    pub fn new(account_ref: impl Into<String>) -> Self {
        Self {
            account_ref: account_ref.into(),
            downloaded_ids: Vec::new(),
            total_downloaded: 0,
            last_download: None,
            current_page: first_page(),
            last_profile: String::new(),
        }
    }

    /// Record a clip. Returns `false` if it was already present.
    pub fn add_download(&mut self, clip_id: &str) -> bool {
        if self.is_downloaded(clip_id) {
            return false;
        }
        self.downloaded_ids.push(clip_id.to_string());
        self.total_downloaded = self.downloaded_ids.len() as u32;
        self.last_download = Some(Utc::now());
        true
    }

    pub fn is_downloaded(&self, clip_id: &str) -> bool {
        self.downloaded_ids.iter().any(|id| id == clip_id)
    }

    /// Set view of the downloaded ids, for filtering a whole feed page.
    pub fn downloaded_set(&self) -> HashSet<&str> {
        self.downloaded_ids.iter().map(String::as_str).collect()
    }

    pub fn clear(&mut self) {
        self.downloaded_ids.clear();
        self.total_downloaded = 0;
        self.last_download = None;
    }
}

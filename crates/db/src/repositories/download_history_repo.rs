//! Per-account download dedup ledger.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tunefleet_core::history::DownloadHistory;

use crate::error::StoreError;
use crate::fs;

/// Persistent map of account reference to [`DownloadHistory`].
pub struct DownloadHistoryStore {
    path: PathBuf,
    histories: Mutex<BTreeMap<String, DownloadHistory>>,
}

impl DownloadHistoryStore {
    /// Load the dedup ledger at `path`, or start empty if it does not exist.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let histories = fs::read_json(&path).await?.unwrap_or_default();
        Ok(Self {
            path,
            histories: Mutex::new(histories),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// History for `account_ref`; a fresh one if the account never downloaded.
    pub async fn get(&self, account_ref: &str) -> DownloadHistory {
        self.histories
            .lock()
            .await
            .get(account_ref)
            .cloned()
            .unwrap_or_else(|| DownloadHistory::new(account_ref))
    }

    pub async fn is_downloaded(&self, account_ref: &str, clip_id: &str) -> bool {
        self.histories
            .lock()
            .await
            .get(account_ref)
            .is_some_and(|h| h.is_downloaded(clip_id))
    }

    /// Record `clip_id` for `account_ref` and persist. Returns `false`
    /// without writing if it was already recorded.
    pub async fn mark_downloaded(&self, account_ref: &str, clip_id: &str) -> Result<bool, StoreError> {
        self.mutate(account_ref, |h| h.add_download(clip_id)).await
    }

    /// Remember where an incremental download left off.
    pub async fn set_cursor(
        &self,
        account_ref: &str,
        page: u32,
        profile: &str,
    ) -> Result<(), StoreError> {
        self.mutate(account_ref, |h| {
            let changed = h.current_page != page || h.last_profile != profile;
            h.current_page = page;
            h.last_profile = profile.to_string();
            changed
        })
        .await
        .map(|_| ())
    }

    /// Forget every download recorded for `account_ref`.
    pub async fn clear(&self, account_ref: &str) -> Result<(), StoreError> {
        self.mutate(account_ref, |h| {
            let changed = !h.downloaded_ids.is_empty();
            h.clear();
            changed
        })
        .await
        .map(|_| ())
    }

    /// Apply `f` to a copy of the account's history; persist and commit only
    /// if `f` reports a change.
    async fn mutate(
        &self,
        account_ref: &str,
        f: impl FnOnce(&mut DownloadHistory) -> bool,
    ) -> Result<bool, StoreError> {
        let mut histories = self.histories.lock().await;
        let mut history = histories
            .get(account_ref)
            .cloned()
            .unwrap_or_else(|| DownloadHistory::new(account_ref));
        if !f(&mut history) {
            return Ok(false);
        }

        let mut next = histories.clone();
        next.insert(account_ref.to_string(), history);
        fs::write_json_atomic(&self.path, &next).await?;
        *histories = next;
        Ok(true)
    }
}

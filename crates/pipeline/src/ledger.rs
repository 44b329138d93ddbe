//! The allocation ledger.
//!
//! [`QueueManager`] owns the prompt pool and every [`QueueEntry`]. All
//! mutations take one async mutex, build the next state on a copy, persist
//! it, and only then swap it in. A failed write therefore leaves both the
//! in-memory and the durable view untouched.
//!
//! Conservation: live entries' `prompt_range`s are pairwise disjoint
//! sub-ranges of the pool, and their lengths never sum past the pool size.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tunefleet_core::prompt::PromptPool;
use tunefleet_core::queue::{validate_entry_counts, PromptRange, QueueEntry, QueueStatus};
use tunefleet_core::types::QueueId;
use tunefleet_db::{LedgerSnapshot, LedgerStore, StoreError, SNAPSHOT_VERSION};

use crate::error::{AllocationError, AllocationErrorKind, LedgerError};

#[derive(Debug, Clone, Default)]
struct LedgerState {
    pool: PromptPool,
    entries: Vec<QueueEntry>,
}

impl LedgerState {
    fn pool_len(&self) -> u32 {
        u32::try_from(self.pool.len()).unwrap_or(u32::MAX)
    }

    fn allocated(&self) -> u32 {
        self.entries.iter().map(|e| e.total_songs).sum()
    }

    fn available(&self) -> u32 {
        self.pool_len().saturating_sub(self.allocated())
    }

    fn position(&self, id: QueueId) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    fn to_snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            version: SNAPSHOT_VERSION.to_string(),
            prompts: self.pool.to_vec(),
            queues: self.entries.clone(),
            last_updated: Some(Utc::now()),
        }
    }

    /// Rebuild from a snapshot, dropping entries that would break
    /// conservation (outside the pool or overlapping an earlier entry).
    fn from_snapshot(snapshot: LedgerSnapshot) -> Self {
        let pool = PromptPool::new(snapshot.prompts);
        let pool_len = u32::try_from(pool.len()).unwrap_or(u32::MAX);
        let mut entries: Vec<QueueEntry> = Vec::with_capacity(snapshot.queues.len());
        for entry in snapshot.queues {
            if entry.prompt_range.end > pool_len {
                tracing::warn!(
                    entry_id = %entry.id,
                    range = %entry.prompt_range,
                    pool_len,
                    "Dropping queue entry outside the prompt pool"
                );
                continue;
            }
            if let Some(other) = entries
                .iter()
                .find(|e| e.prompt_range.overlaps(&entry.prompt_range) || e.id == entry.id)
            {
                tracing::warn!(
                    entry_id = %entry.id,
                    conflicts_with = %other.id,
                    "Dropping queue entry that conflicts with an earlier entry"
                );
                continue;
            }
            entries.push(entry);
        }
        Self { pool, entries }
    }
}

/// First-fit: the lowest start index with `len` consecutive unused slots.
fn first_fit(entries: &[QueueEntry], pool_len: u32, len: u32) -> Option<u32> {
    let mut ranges: Vec<PromptRange> = entries.iter().map(|e| e.prompt_range).collect();
    ranges.sort_by_key(|r| r.start);

    let mut cursor = 0u32;
    for range in ranges {
        if range.start.saturating_sub(cursor) >= len {
            return Some(cursor);
        }
        cursor = cursor.max(range.end);
    }
    (pool_len.saturating_sub(cursor) >= len).then_some(cursor)
}

/// Durable, serialised owner of the prompt pool and all queue entries.
pub struct QueueManager {
    store: Arc<dyn LedgerStore>,
    /// Entries currently driven by an execution run. Not persisted.
    claimed: Mutex<HashSet<QueueId>>,
    state: Mutex<LedgerState>,
}

impl QueueManager {
    /// Load the ledger from `store`, starting empty if nothing was saved.
    pub async fn open(store: Arc<dyn LedgerStore>) -> Result<Self, StoreError> {
        let state = match store.load().await? {
            Some(snapshot) => LedgerState::from_snapshot(snapshot),
            None => LedgerState::default(),
        };
        tracing::info!(
            prompts = state.pool.len(),
            queues = state.entries.len(),
            available = state.available(),
            "Allocation ledger loaded"
        );
        Ok(Self {
            store,
            claimed: Mutex::new(HashSet::new()),
            state: Mutex::new(state),
        })
    }

    /// Persist `next`, then make it current.
    async fn commit(&self, state: &mut LedgerState, next: LedgerState) -> Result<(), StoreError> {
        self.store.save(&next.to_snapshot()).await?;
        *state = next;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Allocation
    // -----------------------------------------------------------------------

    /// Allocate the lowest free contiguous range of `total_songs` prompts
    /// to `account_ref` and persist the new entry before returning it.
    ///
    /// `pool` becomes the ledger's pool if no entries exist yet; otherwise
    /// it must equal the stored pool.
    pub async fn add_queue_entry(
        &self,
        account_ref: &str,
        total_songs: u32,
        songs_per_batch: u32,
        pool: &PromptPool,
    ) -> Result<QueueEntry, LedgerError> {
        let mut state = self.state.lock().await;
        let available = state.available();
        let reject = |kind, detail: String| AllocationError::new(kind, total_songs, available, detail);

        validate_entry_counts(total_songs, songs_per_batch)
            .map_err(|e| reject(AllocationErrorKind::InvalidCounts, e.to_string()))?;

        if pool.is_empty() {
            return Err(reject(AllocationErrorKind::EmptyPool, "prompt pool is empty".into()).into());
        }

        let mut next = state.clone();
        if next.pool != *pool {
            if !next.entries.is_empty() {
                return Err(reject(
                    AllocationErrorKind::PoolMismatch,
                    format!(
                        "{} entries still reference the stored pool of {} prompts",
                        next.entries.len(),
                        next.pool.len()
                    ),
                )
                .into());
            }
            next.pool = pool.clone();
        }

        // Availability is re-derived because the pool may have just changed.
        let available = next.available();
        if total_songs > available {
            return Err(AllocationError::new(
                AllocationErrorKind::InsufficientPrompts,
                total_songs,
                available,
                "not enough unallocated prompts",
            )
            .into());
        }

        let Some(start) = first_fit(&next.entries, next.pool_len(), total_songs) else {
            return Err(AllocationError::new(
                AllocationErrorKind::NoContiguousRange,
                total_songs,
                available,
                "free prompts are fragmented",
            )
            .into());
        };

        let range = PromptRange::new(start, start + total_songs);
        let entry = QueueEntry::new(account_ref, total_songs, songs_per_batch, range).map_err(|e| {
            AllocationError::new(AllocationErrorKind::InvalidCounts, total_songs, available, e.to_string())
        })?;
        next.entries.push(entry.clone());

        self.commit(&mut state, next).await?;
        tracing::info!(
            entry_id = %entry.id,
            account = %entry.account_ref,
            range = %entry.prompt_range,
            songs_per_batch,
            "Queue entry allocated"
        );
        Ok(entry)
    }

    /// Remove an entry unless it is `in_progress`. Returns whether an entry
    /// was removed; its range is free once this returns.
    pub async fn remove_queue_entry(&self, id: QueueId) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(pos) = state.position(id) else {
            return Ok(false);
        };
        if state.entries[pos].status == QueueStatus::InProgress {
            tracing::warn!(entry_id = %id, "Refusing to remove an in-progress queue entry");
            return Ok(false);
        }

        let mut next = state.clone();
        let removed = next.entries.remove(pos);
        self.commit(&mut state, next).await?;
        tracing::info!(entry_id = %id, range = %removed.prompt_range, "Queue entry removed");
        Ok(true)
    }

    /// Drop the pool and every entry. Refused while any entry is
    /// `in_progress`.
    pub async fn clear(&self) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        if state
            .entries
            .iter()
            .any(|e| e.status == QueueStatus::InProgress)
        {
            tracing::warn!("Refusing to clear the ledger while an entry is in progress");
            return Ok(false);
        }
        self.commit(&mut state, LedgerState::default()).await?;
        tracing::info!("Allocation ledger cleared");
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Progress
    // -----------------------------------------------------------------------

    /// Apply a progress update and persist it. Returns `false` for an
    /// unknown id, in which case nothing is written.
    pub async fn update_queue_progress(
        &self,
        id: QueueId,
        completed_count: Option<u32>,
        status: Option<QueueStatus>,
    ) -> Result<bool, StoreError> {
        Ok(self
            .update_and_fetch(id, completed_count, status)
            .await?
            .is_some())
    }

    /// Like [`update_queue_progress`](Self::update_queue_progress) but
    /// returns the entry as persisted.
    ///
    /// `completed_count` is clamped to `[0, total_songs]` and never moves
    /// backwards. Reaching `total_songs` forces `completed`; a `completed`
    /// status supplied for an unfinished entry is ignored.
    pub async fn update_and_fetch(
        &self,
        id: QueueId,
        completed_count: Option<u32>,
        status: Option<QueueStatus>,
    ) -> Result<Option<QueueEntry>, StoreError> {
        let mut state = self.state.lock().await;
        let Some(pos) = state.position(id) else {
            tracing::warn!(entry_id = %id, "Progress update for unknown queue entry");
            return Ok(None);
        };

        let mut next = state.clone();
        let entry = &mut next.entries[pos];
        if let Some(requested) = completed_count {
            let clamped = requested.min(entry.total_songs);
            if clamped < entry.completed_count {
                tracing::debug!(
                    entry_id = %id,
                    current = entry.completed_count,
                    requested,
                    "Ignoring backwards progress update"
                );
            }
            entry.completed_count = entry.completed_count.max(clamped);
        }
        if let Some(status) = status {
            if status != QueueStatus::Completed || entry.is_complete() {
                entry.status = status;
            }
        }
        if entry.is_complete() {
            entry.status = QueueStatus::Completed;
        }
        let updated = entry.clone();

        self.commit(&mut state, next).await?;
        Ok(Some(updated))
    }

    // -----------------------------------------------------------------------
    // Run claims
    // -----------------------------------------------------------------------

    /// Reserve `id` for one execution run. Returns `false` if another run
    /// already holds it.
    pub async fn claim(&self, id: QueueId) -> bool {
        self.claimed.lock().await.insert(id)
    }

    pub async fn release(&self, id: QueueId) {
        self.claimed.lock().await.remove(&id);
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Pure pre-flight check: would `requested_total` more prompts fit?
    pub async fn validate_total_prompts(&self, requested_total: u32) -> bool {
        requested_total <= self.state.lock().await.available()
    }

    pub async fn available_prompt_slots(&self) -> u32 {
        self.state.lock().await.available()
    }

    pub async fn prompt_pool(&self) -> PromptPool {
        self.state.lock().await.pool.clone()
    }

    pub async fn get_queue(&self, id: QueueId) -> Option<QueueEntry> {
        let state = self.state.lock().await;
        state.position(id).map(|pos| state.entries[pos].clone())
    }

    /// Every entry in creation order.
    pub async fn get_all_queues(&self) -> Vec<QueueEntry> {
        self.state.lock().await.entries.clone()
    }

    /// Entries `pending` or `in_progress`, in creation order.
    pub async fn get_pending_queues(&self) -> Vec<QueueEntry> {
        self.filtered(|e| e.status.is_pending()).await
    }

    /// Entries with prompts left to run, including `paused` and `failed`
    /// ones, in creation order.
    pub async fn get_resumable_queues(&self) -> Vec<QueueEntry> {
        self.filtered(|e| e.status != QueueStatus::Completed && !e.is_complete())
            .await
    }

    async fn filtered(&self, keep: impl Fn(&QueueEntry) -> bool) -> Vec<QueueEntry> {
        self.state
            .lock()
            .await
            .entries
            .iter()
            .filter(|e| keep(e))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tunefleet_core::prompt::Prompt;
    use tunefleet_db::MemoryStore;

    fn pool(n: usize) -> PromptPool {
        (0..n).map(|i| Prompt::new(format!("style-{i}"))).collect()
    }

    async fn ledger() -> QueueManager {
        QueueManager::open(Arc::new(MemoryStore::new())).await.unwrap()
    }

    fn entry_at(start: u32, end: u32) -> QueueEntry {
        QueueEntry::new("x", end - start, 1, PromptRange::new(start, end)).unwrap()
    }

    // -- first_fit ------------------------------------------------------------

    #[test]
    fn first_fit_on_empty_ledger_starts_at_zero() {
        assert_eq!(first_fit(&[], 10, 4), Some(0));
        assert_eq!(first_fit(&[], 3, 4), None);
    }

    #[test]
    fn first_fit_reuses_lowest_gap() {
        let entries = vec![entry_at(0, 2), entry_at(5, 8)];
        assert_eq!(first_fit(&entries, 10, 3), Some(2));
        assert_eq!(first_fit(&entries, 10, 2), Some(2));
        assert_eq!(first_fit(&entries, 12, 4), Some(8));
    }

    #[test]
    fn first_fit_ignores_insertion_order() {
        let entries = vec![entry_at(6, 10), entry_at(0, 3)];
        assert_eq!(first_fit(&entries, 10, 3), Some(3));
        assert_eq!(first_fit(&entries, 10, 4), None);
    }

    // -- add_queue_entry ------------------------------------------------------

    #[tokio::test]
    async fn invalid_counts_rejected() {
        let ledger = ledger().await;
        let err = ledger.add_queue_entry("a", 3, 4, &pool(10)).await.unwrap_err();
        assert_matches!(
            err,
            LedgerError::Allocation(AllocationError { kind: AllocationErrorKind::InvalidCounts, .. })
        );
        let err = ledger.add_queue_entry("a", 0, 0, &pool(10)).await.unwrap_err();
        assert_matches!(
            err,
            LedgerError::Allocation(AllocationError { kind: AllocationErrorKind::InvalidCounts, .. })
        );
    }

    #[tokio::test]
    async fn empty_pool_rejected() {
        let ledger = ledger().await;
        let err = ledger
            .add_queue_entry("a", 1, 1, &PromptPool::default())
            .await
            .unwrap_err();
        assert_matches!(
            err,
            LedgerError::Allocation(AllocationError { kind: AllocationErrorKind::EmptyPool, .. })
        );
    }

    #[tokio::test]
    async fn pool_switch_rejected_while_entries_exist() {
        let ledger = ledger().await;
        ledger.add_queue_entry("a", 2, 1, &pool(10)).await.unwrap();
        let err = ledger.add_queue_entry("b", 2, 1, &pool(12)).await.unwrap_err();
        assert_matches!(
            err,
            LedgerError::Allocation(AllocationError { kind: AllocationErrorKind::PoolMismatch, .. })
        );
    }

    #[tokio::test]
    async fn pool_replaced_when_ledger_is_empty() {
        let ledger = ledger().await;
        let e = ledger.add_queue_entry("a", 2, 1, &pool(10)).await.unwrap();
        assert!(ledger.remove_queue_entry(e.id).await.unwrap());

        ledger.add_queue_entry("b", 12, 3, &pool(12)).await.unwrap();
        assert_eq!(ledger.prompt_pool().await.len(), 12);
        assert_eq!(ledger.available_prompt_slots().await, 0);
    }

    #[tokio::test]
    async fn fragmented_pool_reports_no_contiguous_range() {
        let ledger = ledger().await;
        let p = pool(10);
        let a = ledger.add_queue_entry("a", 3, 1, &p).await.unwrap();
        ledger.add_queue_entry("b", 3, 1, &p).await.unwrap();
        let c = ledger.add_queue_entry("c", 3, 1, &p).await.unwrap();
        assert!(ledger.remove_queue_entry(a.id).await.unwrap());
        assert!(ledger.remove_queue_entry(c.id).await.unwrap());

        // 7 free slots, but split 3 + 4.
        assert_eq!(ledger.available_prompt_slots().await, 7);
        let err = ledger.add_queue_entry("d", 5, 1, &p).await.unwrap_err();
        assert_matches!(
            err,
            LedgerError::Allocation(AllocationError {
                kind: AllocationErrorKind::NoContiguousRange,
                requested: 5,
                available: 7,
                ..
            })
        );
        let d = ledger.add_queue_entry("d", 4, 1, &p).await.unwrap();
        assert_eq!(d.prompt_range, PromptRange::new(6, 10));
    }

    // -- update_queue_progress ------------------------------------------------

    #[tokio::test]
    async fn progress_is_clamped_and_forces_completed() {
        let ledger = ledger().await;
        let e = ledger.add_queue_entry("a", 4, 2, &pool(4)).await.unwrap();

        let updated = ledger
            .update_and_fetch(e.id, Some(9), Some(QueueStatus::Failed))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.completed_count, 4);
        assert_eq!(updated.status, QueueStatus::Completed);
    }

    #[tokio::test]
    async fn progress_never_moves_backwards() {
        let ledger = ledger().await;
        let e = ledger.add_queue_entry("a", 6, 2, &pool(6)).await.unwrap();
        ledger.update_queue_progress(e.id, Some(3), None).await.unwrap();
        ledger.update_queue_progress(e.id, Some(1), None).await.unwrap();
        assert_eq!(ledger.get_queue(e.id).await.unwrap().completed_count, 3);
    }

    #[tokio::test]
    async fn premature_completed_status_is_ignored() {
        let ledger = ledger().await;
        let e = ledger.add_queue_entry("a", 6, 2, &pool(6)).await.unwrap();
        ledger
            .update_queue_progress(e.id, Some(2), Some(QueueStatus::Completed))
            .await
            .unwrap();
        let stored = ledger.get_queue(e.id).await.unwrap();
        assert_eq!(stored.status, QueueStatus::Pending);
        assert_eq!(stored.completed_count, 2);
    }

    #[tokio::test]
    async fn unknown_id_returns_false_without_writing() {
        let store = Arc::new(MemoryStore::new());
        let ledger = QueueManager::open(store.clone()).await.unwrap();
        let saves = store.save_count();
        let updated = ledger
            .update_queue_progress(uuid::Uuid::new_v4(), Some(1), None)
            .await
            .unwrap();
        assert!(!updated);
        assert_eq!(store.save_count(), saves);
    }

    // -- claim ----------------------------------------------------------------

    #[tokio::test]
    async fn claim_is_exclusive_until_released() {
        let ledger = ledger().await;
        let e = ledger.add_queue_entry("a", 2, 1, &pool(2)).await.unwrap();
        assert!(ledger.claim(e.id).await);
        assert!(!ledger.claim(e.id).await);
        ledger.release(e.id).await;
        assert!(ledger.claim(e.id).await);
    }

    // -- queries --------------------------------------------------------------

    #[tokio::test]
    async fn pending_and_resumable_views() {
        let ledger = ledger().await;
        let p = pool(10);
        let a = ledger.add_queue_entry("a", 2, 1, &p).await.unwrap();
        let b = ledger.add_queue_entry("b", 2, 1, &p).await.unwrap();
        let c = ledger.add_queue_entry("c", 2, 1, &p).await.unwrap();
        let d = ledger.add_queue_entry("d", 2, 1, &p).await.unwrap();

        ledger
            .update_queue_progress(b.id, None, Some(QueueStatus::InProgress))
            .await
            .unwrap();
        ledger
            .update_queue_progress(c.id, Some(1), Some(QueueStatus::Failed))
            .await
            .unwrap();
        ledger.update_queue_progress(d.id, Some(2), None).await.unwrap();

        let pending: Vec<_> = ledger.get_pending_queues().await.iter().map(|e| e.id).collect();
        assert_eq!(pending, vec![a.id, b.id]);
        let resumable: Vec<_> = ledger.get_resumable_queues().await.iter().map(|e| e.id).collect();
        assert_eq!(resumable, vec![a.id, b.id, c.id]);
    }

    #[tokio::test]
    async fn validate_total_prompts_is_pure() {
        let ledger = ledger().await;
        ledger.add_queue_entry("a", 6, 2, &pool(10)).await.unwrap();
        assert!(ledger.validate_total_prompts(4).await);
        assert!(!ledger.validate_total_prompts(5).await);
        assert_eq!(ledger.available_prompt_slots().await, 4);
    }

    #[tokio::test]
    async fn clear_refused_while_in_progress() {
        let ledger = ledger().await;
        let e = ledger.add_queue_entry("a", 2, 1, &pool(4)).await.unwrap();
        ledger
            .update_queue_progress(e.id, None, Some(QueueStatus::InProgress))
            .await
            .unwrap();
        assert!(!ledger.clear().await.unwrap());

        ledger
            .update_queue_progress(e.id, None, Some(QueueStatus::Paused))
            .await
            .unwrap();
        assert!(ledger.clear().await.unwrap());
        assert!(ledger.get_all_queues().await.is_empty());
        assert!(ledger.prompt_pool().await.is_empty());
    }

    // -- open -----------------------------------------------------------------

    #[tokio::test]
    async fn conflicting_entries_dropped_on_open() {
        let store = Arc::new(MemoryStore::new());
        let snapshot = LedgerSnapshot {
            prompts: pool(6).to_vec(),
            queues: vec![entry_at(0, 3), entry_at(2, 4), entry_at(4, 8)],
            ..Default::default()
        };
        store.save(&snapshot).await.unwrap();

        let ledger = QueueManager::open(store).await.unwrap();
        let ranges: Vec<_> = ledger
            .get_all_queues()
            .await
            .iter()
            .map(|e| e.prompt_range)
            .collect();
        assert_eq!(ranges, vec![PromptRange::new(0, 3)]);
        assert_eq!(ledger.available_prompt_slots().await, 3);
    }
}

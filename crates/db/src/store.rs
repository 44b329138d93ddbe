//! The persistence seam of the allocation ledger.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::fs;
use crate::snapshot::LedgerSnapshot;

/// Durable home for a [`LedgerSnapshot`].
///
/// `save` must be atomic: a concurrent `load` observes either the previous
/// snapshot or the new one.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Read the current snapshot, or `None` if nothing was ever saved.
    async fn load(&self) -> Result<Option<LedgerSnapshot>, StoreError>;

    /// Replace the stored snapshot.
    async fn save(&self, snapshot: &LedgerSnapshot) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// JsonFileStore
// ---------------------------------------------------------------------------

/// Snapshot kept in one pretty-printed JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LedgerStore for JsonFileStore {
    async fn load(&self) -> Result<Option<LedgerSnapshot>, StoreError> {
        fs::read_json(&self.path).await
    }

    async fn save(&self, snapshot: &LedgerSnapshot) -> Result<(), StoreError> {
        fs::write_json_atomic(&self.path, snapshot).await?;
        tracing::debug!(
            path = %self.path.display(),
            queues = snapshot.queues.len(),
            "Ledger snapshot saved"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Keeps the serialized snapshot bytes in memory.
///
/// Storing bytes rather than the struct keeps the serialization path
/// identical to the file store and lets callers compare persisted state
/// exactly.
#[derive(Debug, Default)]
pub struct MemoryStore {
    bytes: Mutex<Option<Vec<u8>>>,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last saved bytes, if any.
    pub async fn bytes(&self) -> Option<Vec<u8>> {
        self.bytes.lock().await.clone()
    }

    /// Number of successful `save` calls so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn load(&self) -> Result<Option<LedgerSnapshot>, StoreError> {
        let guard = self.bytes.lock().await;
        match guard.as_deref() {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(bytes)
                .map(Some)
                .map_err(|e| StoreError::serialization("<memory>", e)),
        }
    }

    async fn save(&self, snapshot: &LedgerSnapshot) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| StoreError::serialization("<memory>", e))?;
        *self.bytes.lock().await = Some(bytes);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

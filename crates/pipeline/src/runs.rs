//! Registry of in-flight execution runs.
//!
//! Each run gets a child of the registry's master token, so
//! [`RunRegistry::shutdown`] cancels every run at once while
//! [`RunRegistry::cancel`] targets a single one.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tunefleet_core::types::OperationId;

pub struct RunRegistry {
    runs: RwLock<HashMap<OperationId, CancellationToken>>,
    /// Master cancellation token, cancelled during shutdown.
    cancel: CancellationToken,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::with_parent(&CancellationToken::new())
    }

    /// Registry whose runs are also cancelled when `parent` is.
    pub fn with_parent(parent: &CancellationToken) -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            cancel: parent.child_token(),
        }
    }

    /// Start tracking `operation_id` and return the token its run should
    /// watch. Registering an id twice returns the existing token.
    pub async fn register(&self, operation_id: OperationId) -> CancellationToken {
        self.runs
            .write()
            .await
            .entry(operation_id)
            .or_insert_with(|| self.cancel.child_token())
            .clone()
    }

    /// Request cooperative cancellation. Returns `false` for unknown ids.
    pub async fn cancel(&self, operation_id: OperationId) -> bool {
        match self.runs.read().await.get(&operation_id) {
            Some(token) => {
                token.cancel();
                tracing::info!(operation_id = %operation_id, "Run cancellation requested");
                true
            }
            None => false,
        }
    }

    pub async fn is_active(&self, operation_id: OperationId) -> bool {
        self.runs.read().await.contains_key(&operation_id)
    }

    pub async fn active_operations(&self) -> Vec<OperationId> {
        self.runs.read().await.keys().copied().collect()
    }

    /// Stop tracking a finished run.
    pub async fn complete(&self, operation_id: OperationId) {
        self.runs.write().await.remove(&operation_id);
    }

    /// Cancel every registered and future run.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new()
    }
}

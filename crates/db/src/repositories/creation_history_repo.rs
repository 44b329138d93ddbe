//! Store for per-prompt [`CreationRecord`]s, newest first.

use std::path::{Path, PathBuf};

use tokio::sync::RwLock;
use tunefleet_core::history::{CreationRecord, CreationStatus};

use crate::error::StoreError;
use crate::fs;

/// Persistent list of creation records.
pub struct CreationHistoryStore {
    path: PathBuf,
    records: RwLock<Vec<CreationRecord>>,
}

impl CreationHistoryStore {
    /// Load the history file at `path`. A missing file starts an empty
    /// history; records that fail to parse are dropped with a warning.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let raw: Vec<serde_json::Value> = fs::read_json(&path).await?.unwrap_or_default();
        let records = raw
            .into_iter()
            .filter_map(|value| match serde_json::from_value(value) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping malformed creation record");
                    None
                }
            })
            .collect();
        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Prepend `record` and persist the whole history.
    ///
    /// The in-memory list only changes once the write succeeds.
    pub async fn add(&self, record: CreationRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let mut next = Vec::with_capacity(records.len() + 1);
        next.push(record);
        next.extend(records.iter().cloned());
        fs::write_json_atomic(&self.path, &next).await?;
        *records = next;
        Ok(())
    }

    /// Every record, newest first.
    pub async fn all(&self) -> Vec<CreationRecord> {
        self.records.read().await.clone()
    }

    pub async fn by_account(&self, account_ref: &str) -> Vec<CreationRecord> {
        self.filtered(|r| r.account_ref == account_ref).await
    }

    /// Records for prompts that failed.
    pub async fn failures(&self) -> Vec<CreationRecord> {
        self.filtered(|r| r.status == CreationStatus::Failed).await
    }

    /// Case-insensitive search over title, artifact id and status.
    pub async fn search(&self, keyword: &str) -> Vec<CreationRecord> {
        self.filtered(|r| r.matches_keyword(keyword)).await
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Write every record, newest first, as CSV to `output`. Returns the
    /// number of records written.
    pub async fn export_csv(&self, output: &Path) -> Result<usize, StoreError> {
        let records = self.records.read().await;
        let mut csv = String::from("timestamp,account,prompt_index,title,artifact_ref,status,error\n");
        for r in records.iter() {
            csv.push_str(&format!(
                "{},{},{},{},{},{},{}\n",
                r.created_at.to_rfc3339(),
                csv_field(&r.account_ref),
                r.prompt_index,
                csv_field(&r.title),
                csv_field(r.artifact_ref.as_deref().unwrap_or("")),
                r.status.as_str(),
                csv_field(r.error_message.as_deref().unwrap_or("")),
            ));
        }
        fs::write_bytes_atomic(output, csv.as_bytes()).await?;
        tracing::info!(path = %output.display(), records = records.len(), "Creation history exported");
        Ok(records.len())
    }

    async fn filtered(&self, keep: impl Fn(&CreationRecord) -> bool) -> Vec<CreationRecord> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| keep(r))
            .cloned()
            .collect()
    }
}

/// Quote a CSV field when it contains a delimiter, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

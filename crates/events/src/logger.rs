//! Mirrors bus traffic into `tracing`.
//!
//! [`EventLogger`] runs as a long-lived background task and shuts down when
//! the [`EventBus`](crate::bus::EventBus) is dropped.

use tokio::sync::broadcast;

use crate::bus::{EventKind, FleetEvent};

/// Background service that logs every event it receives.
pub struct EventLogger;

impl EventLogger {
    /// Run the logging loop until the channel closes.
    ///
    /// Returns the number of events logged.
    pub async fn run(mut receiver: broadcast::Receiver<FleetEvent>) -> u64 {
        let mut logged = 0;
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    Self::log(&event);
                    logged += 1;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Event logger lagged, some events were not logged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::debug!("Event bus closed, logger shutting down");
                    break;
                }
            }
        }
        logged
    }

    fn log(event: &FleetEvent) {
        let op = event.operation_id.map(|id| id.to_string()).unwrap_or_default();
        match &event.kind {
            EventKind::RunStarted { entry_ids } => {
                tracing::info!(operation_id = %op, entries = entry_ids.len(), "Run started");
            }
            EventKind::PromptCompleted {
                entry_id,
                prompt_index,
                completed,
                total,
                success,
                ..
            } => {
                tracing::debug!(
                    operation_id = %op,
                    entry_id = %entry_id,
                    prompt_index,
                    completed,
                    total,
                    success,
                    "Prompt completed"
                );
            }
            EventKind::ItemFailed {
                entry_id,
                prompt_index,
                reason,
            } => {
                tracing::warn!(
                    operation_id = %op,
                    entry_id = %entry_id,
                    prompt_index,
                    reason = %reason,
                    "Prompt failed"
                );
            }
            EventKind::BatchCompleted {
                entry_id,
                completed,
                total,
                batch_index,
                batch_count,
            } => {
                tracing::info!(
                    operation_id = %op,
                    entry_id = %entry_id,
                    completed,
                    total,
                    batch = batch_index + 1,
                    batch_count,
                    "Batch completed"
                );
            }
            EventKind::StatusChanged { entry_id, from, to } => {
                tracing::info!(
                    operation_id = %op,
                    entry_id = %entry_id,
                    from = %from,
                    to = %to,
                    "Entry status changed"
                );
            }
            EventKind::EntrySkipped { entry_id, reason } => {
                tracing::warn!(operation_id = %op, entry_id = %entry_id, reason = %reason, "Entry skipped");
            }
            EventKind::RunFinished {
                entries,
                succeeded,
                failed,
                cancelled,
            } => {
                tracing::info!(
                    operation_id = %op,
                    entries,
                    succeeded,
                    failed,
                    cancelled,
                    "Run finished"
                );
            }
            EventKind::DownloadProgress {
                account_ref,
                clip_id,
                success,
                failed,
                skipped,
            } => {
                tracing::debug!(
                    account = %account_ref,
                    clip_id = %clip_id,
                    success,
                    failed,
                    skipped,
                    "Download progress"
                );
            }
            EventKind::DownloadFinished {
                account_ref,
                success,
                failed,
                skipped,
                cancelled,
            } => {
                tracing::info!(
                    account = %account_ref,
                    success,
                    failed,
                    skipped,
                    cancelled,
                    "Download finished"
                );
            }
        }
    }
}

//! Batch execution engine.
//!
//! Drives selected queue entries through an [`AutomationSession`], strictly
//! one entry, one batch and one prompt at a time. Every observed prompt
//! outcome advances `completed_count` by one and is persisted before the
//! next prompt is looked at, so a restarted process resumes exactly at the
//! first prompt whose outcome was never recorded.
//!
//! Failure policy:
//! - a failed prompt is recorded and consumes its slot; the run continues;
//! - a dead session fails the current entry and moves to the next one;
//! - a failed progress write ends the whole run with [`EngineError`].

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tunefleet_core::batching::{plan_batches, Batch};
use tunefleet_core::error::CoreError;
use tunefleet_core::history::CreationRecord;
use tunefleet_core::prompt::{Prompt, PromptPool};
use tunefleet_core::queue::{QueueEntry, QueueStatus};
use tunefleet_core::types::{OperationId, QueueId};
use tunefleet_db::CreationHistoryStore;
use tunefleet_events::{EventBus, EventKind, FleetEvent};

use crate::error::EngineError;
use crate::ledger::QueueManager;
use crate::options::GenerationOptions;
use crate::session::{AutomationSession, ItemResult, SessionFactory};

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// How one entry fared during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryOutcome {
    pub entry_id: QueueId,
    pub account_ref: String,
    /// Prompts whose outcome was observed during this run.
    pub attempted: u32,
    pub succeeded: u32,
    pub failed: u32,
    /// Durable progress after the run.
    pub completed_count: u32,
    pub total_songs: u32,
    pub status: QueueStatus,
    /// Why the entry stopped early, if it did.
    pub error: Option<String>,
}

impl EntryOutcome {
    fn new(entry: &QueueEntry) -> Self {
        Self {
            entry_id: entry.id,
            account_ref: entry.account_ref.clone(),
            attempted: 0,
            succeeded: 0,
            failed: 0,
            completed_count: entry.completed_count,
            total_songs: entry.total_songs,
            status: entry.status,
            error: None,
        }
    }
}

/// Result of one [`BatchEngine::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub operation_id: OperationId,
    /// Executed entries, in selection order.
    pub entries: Vec<EntryOutcome>,
    /// Selected ids that were not executed (unknown or already completed).
    pub skipped: Vec<QueueId>,
    /// The run stopped early because its token was cancelled.
    pub cancelled: bool,
}

impl RunReport {
    fn new(operation_id: OperationId) -> Self {
        Self {
            operation_id,
            entries: Vec::new(),
            skipped: Vec::new(),
            cancelled: false,
        }
    }

    pub fn entry(&self, id: QueueId) -> Option<&EntryOutcome> {
        self.entries.iter().find(|o| o.entry_id == id)
    }

    pub fn succeeded(&self) -> u32 {
        self.entries.iter().map(|o| o.succeeded).sum()
    }

    pub fn failed(&self) -> u32 {
        self.entries.iter().map(|o| o.failed).sum()
    }
}

/// Working state for the entry currently being driven.
struct EntryRun {
    operation_id: OperationId,
    /// The entry as last persisted.
    entry: QueueEntry,
    outcome: EntryOutcome,
}

impl EntryRun {
    fn finish(mut self) -> EntryOutcome {
        self.outcome.completed_count = self.entry.completed_count;
        self.outcome.status = self.entry.status;
        self.outcome
    }
}

// ---------------------------------------------------------------------------
// BatchEngine
// ---------------------------------------------------------------------------

pub struct BatchEngine {
    ledger: Arc<QueueManager>,
    sessions: Arc<dyn SessionFactory>,
    events: Arc<EventBus>,
    history: Option<Arc<CreationHistoryStore>>,
    options: GenerationOptions,
}

impl BatchEngine {
    pub fn new(
        ledger: Arc<QueueManager>,
        sessions: Arc<dyn SessionFactory>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            ledger,
            sessions,
            events,
            history: None,
            options: GenerationOptions::default(),
        }
    }

    /// Record every prompt outcome in `history`.
    pub fn with_history(mut self, history: Arc<CreationHistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    /// Options passed to every session. Rejected if a slider is out of
    /// range.
    pub fn with_options(mut self, options: GenerationOptions) -> Result<Self, CoreError> {
        options.validate()?;
        self.options = options;
        Ok(self)
    }

    /// Execute `entry_ids` sequentially in the given order.
    ///
    /// Each entry is claimed in the ledger for the duration of its run; an
    /// entry already claimed by a concurrent run is skipped.
    ///
    /// Cancellation is honoured between batches: the current batch is
    /// finished and persisted, the entry is marked `paused`, and the run
    /// returns with `cancelled` set.
    pub async fn run(
        &self,
        operation_id: OperationId,
        entry_ids: &[QueueId],
        cancel: &CancellationToken,
    ) -> Result<RunReport, EngineError> {
        tracing::info!(operation_id = %operation_id, entries = entry_ids.len(), "Batch run starting");
        self.emit(
            operation_id,
            EventKind::RunStarted {
                entry_ids: entry_ids.to_vec(),
            },
        );

        let pool = self.ledger.prompt_pool().await;
        let mut report = RunReport::new(operation_id);

        for &id in entry_ids {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            if !self.ledger.claim(id).await {
                tracing::warn!(operation_id = %operation_id, entry_id = %id, "Queue entry is being run by another operation, skipping");
                self.skip(&mut report, id, "claimed by another run");
                continue;
            }
            // Read after claiming so progress made by an earlier run is seen.
            let entry = match self.ledger.get_queue(id).await {
                Some(entry) if !entry.is_complete() => entry,
                Some(_) => {
                    self.ledger.release(id).await;
                    tracing::info!(entry_id = %id, "Queue entry already completed, skipping");
                    self.skip(&mut report, id, "already completed");
                    continue;
                }
                None => {
                    self.ledger.release(id).await;
                    tracing::warn!(operation_id = %operation_id, entry_id = %id, "Selected queue entry not found, skipping");
                    self.skip(&mut report, id, "entry not found");
                    continue;
                }
            };

            let outcome = self.run_entry(operation_id, entry, &pool, cancel).await;
            self.ledger.release(id).await;
            let outcome = outcome?;
            let paused = outcome.status == QueueStatus::Paused;
            report.entries.push(outcome);
            if paused {
                report.cancelled = true;
                break;
            }
        }

        tracing::info!(
            operation_id = %operation_id,
            entries = report.entries.len(),
            skipped = report.skipped.len(),
            succeeded = report.succeeded(),
            failed = report.failed(),
            cancelled = report.cancelled,
            "Batch run finished"
        );
        self.emit(
            operation_id,
            EventKind::RunFinished {
                entries: report.entries.len() as u32,
                succeeded: report.succeeded(),
                failed: report.failed(),
                cancelled: report.cancelled,
            },
        );
        Ok(report)
    }

    fn skip(&self, report: &mut RunReport, id: QueueId, reason: &str) {
        report.skipped.push(id);
        self.emit(
            report.operation_id,
            EventKind::EntrySkipped {
                entry_id: id,
                reason: reason.to_string(),
            },
        );
    }

    /// Open a session for `entry`, drive it, and always close the session.
    async fn run_entry(
        &self,
        operation_id: OperationId,
        entry: QueueEntry,
        pool: &PromptPool,
        cancel: &CancellationToken,
    ) -> Result<EntryOutcome, EngineError> {
        let mut run = EntryRun {
            operation_id,
            outcome: EntryOutcome::new(&entry),
            entry,
        };
        tracing::info!(
            operation_id = %operation_id,
            entry_id = %run.entry.id,
            account = %run.entry.account_ref,
            remaining = %run.entry.remaining_range(),
            "Starting queue entry"
        );

        let mut session = match self.sessions.open(&run.entry.account_ref).await {
            Ok(session) => session,
            Err(e) => {
                self.fail_entry(&mut run, e.to_string()).await?;
                return Ok(run.finish());
            }
        };

        let result = self.drive(&mut run, session.as_mut(), pool, cancel).await;
        session.close().await;
        result?;
        Ok(run.finish())
    }

    async fn drive(
        &self,
        run: &mut EntryRun,
        session: &mut dyn AutomationSession,
        pool: &PromptPool,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        let batches = plan_batches(&run.entry);
        let batch_count = batches.len() as u32;

        for batch in batches {
            if batch.index > 0 && cancel.is_cancelled() {
                tracing::info!(
                    entry_id = %run.entry.id,
                    completed = run.entry.completed_count,
                    "Run cancelled between batches, pausing entry"
                );
                self.apply_update(run, None, Some(QueueStatus::Paused)).await?;
                return Ok(());
            }

            if run.entry.status != QueueStatus::InProgress
                && !self
                    .apply_update(run, None, Some(QueueStatus::InProgress))
                    .await?
            {
                return Ok(());
            }

            let Some(prompts) = pool.slice(batch.range.as_usize_range()) else {
                let reason = format!("prompt range {} lies outside the pool", batch.range);
                return self.fail_entry(run, reason).await;
            };

            tracing::debug!(
                entry_id = %run.entry.id,
                batch = batch.index + 1,
                batch_count,
                range = %batch.range,
                "Submitting batch"
            );
            let results = match session.submit_batch(prompts, &self.options).await {
                Ok(results) => results,
                Err(e) => return self.fail_entry(run, e.to_string()).await,
            };

            if results.len() > prompts.len() {
                tracing::warn!(
                    entry_id = %run.entry.id,
                    expected = prompts.len(),
                    received = results.len(),
                    "Session returned extra results, ignoring them"
                );
            }
            for (offset, (prompt, result)) in prompts.iter().zip(&results).enumerate() {
                let prompt_index = batch.range.start + offset as u32;
                if !self.record_prompt(run, &batch, prompt_index, prompt, result).await? {
                    return Ok(());
                }
            }
            if results.len() < prompts.len() {
                let reason = format!(
                    "session returned {} results for {} prompts",
                    results.len(),
                    prompts.len()
                );
                return self.fail_entry(run, reason).await;
            }

            self.emit(
                run.operation_id,
                EventKind::BatchCompleted {
                    entry_id: run.entry.id,
                    completed: run.entry.completed_count,
                    total: run.entry.total_songs,
                    batch_index: batch.index,
                    batch_count,
                },
            );
        }
        Ok(())
    }

    /// Count one observed prompt outcome. Returns `false` if the entry
    /// disappeared from the ledger.
    async fn record_prompt(
        &self,
        run: &mut EntryRun,
        batch: &Batch,
        prompt_index: u32,
        prompt: &Prompt,
        result: &ItemResult,
    ) -> Result<bool, EngineError> {
        run.outcome.attempted += 1;
        let next = run.entry.completed_count + 1;
        if !self.apply_update(run, Some(next), None).await? {
            return Ok(false);
        }

        let entry = &run.entry;
        let record = match result {
            ItemResult::Success { artifact_ref } => {
                run.outcome.succeeded += 1;
                tracing::info!(
                    entry_id = %entry.id,
                    prompt_index,
                    batch = batch.index + 1,
                    completed = entry.completed_count,
                    total = entry.total_songs,
                    artifact = artifact_ref.as_deref().unwrap_or("-"),
                    "Prompt submitted"
                );
                CreationRecord::success(
                    &entry.account_ref,
                    prompt_index,
                    prompt.display_title(),
                    artifact_ref.clone(),
                )
            }
            ItemResult::Failure { reason } => {
                run.outcome.failed += 1;
                tracing::warn!(
                    entry_id = %entry.id,
                    prompt_index,
                    reason = %reason,
                    "Prompt failed, continuing"
                );
                self.emit(
                    run.operation_id,
                    EventKind::ItemFailed {
                        entry_id: entry.id,
                        prompt_index,
                        reason: reason.clone(),
                    },
                );
                CreationRecord::failure(&entry.account_ref, prompt_index, prompt.display_title(), reason)
            }
        };

        if let Some(history) = &self.history {
            if let Err(e) = history.add(record).await {
                tracing::warn!(entry_id = %entry.id, prompt_index, error = %e, "Failed to record creation history");
            }
        }

        self.emit(
            run.operation_id,
            EventKind::PromptCompleted {
                entry_id: entry.id,
                prompt_index,
                completed: entry.completed_count,
                total: entry.total_songs,
                status: entry.status,
                success: result.is_success(),
            },
        );
        Ok(true)
    }

    /// Mark the entry `failed` at its last persisted progress.
    async fn fail_entry(&self, run: &mut EntryRun, reason: String) -> Result<(), EngineError> {
        tracing::warn!(
            entry_id = %run.entry.id,
            account = %run.entry.account_ref,
            completed = run.entry.completed_count,
            reason = %reason,
            "Automation session unavailable, marking entry failed"
        );
        run.outcome.error = Some(reason);
        self.apply_update(run, None, Some(QueueStatus::Failed)).await?;
        Ok(())
    }

    /// Persist an update through the ledger and adopt the stored entry.
    ///
    /// Returns `false` if the entry no longer exists.
    async fn apply_update(
        &self,
        run: &mut EntryRun,
        completed_count: Option<u32>,
        status: Option<QueueStatus>,
    ) -> Result<bool, EngineError> {
        let id = run.entry.id;
        let updated = self
            .ledger
            .update_and_fetch(id, completed_count, status)
            .await
            .map_err(|source| {
                tracing::error!(entry_id = %id, error = %source, "Progress write failed, stopping run");
                EngineError::Persistence { entry_id: id, source }
            })?;

        let Some(updated) = updated else {
            tracing::warn!(entry_id = %id, "Queue entry removed during run, stopping it");
            run.outcome.error = Some("entry removed during run".to_string());
            return Ok(false);
        };

        if updated.status != run.entry.status {
            self.emit(
                run.operation_id,
                EventKind::StatusChanged {
                    entry_id: id,
                    from: run.entry.status,
                    to: updated.status,
                },
            );
        }
        run.entry = updated;
        Ok(true)
    }

    fn emit(&self, operation_id: OperationId, kind: EventKind) {
        self.events
            .publish(FleetEvent::new(kind).for_operation(operation_id));
    }
}

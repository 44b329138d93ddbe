mod config;

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tunefleet_db::{CreationHistoryStore, DownloadHistoryStore, JsonFileStore};
use tunefleet_events::{EventBus, EventLogger};
use tunefleet_pipeline::{BatchEngine, DryRunFactory, QueueManager, RunRegistry};
use tunefleet_studio::{DownloadManager, DownloadRequest, Feed, StudioApi};

use crate::config::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "tunefleet_worker=info,tunefleet_pipeline=info,tunefleet_studio=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerConfig::from_env()?;
    tracing::info!(data_dir = %config.data_dir.display(), dry_run = config.dry_run, "Worker starting");

    // --- State ---
    let ledger = Arc::new(
        QueueManager::open(Arc::new(JsonFileStore::new(&config.queue_state_file)))
            .await
            .with_context(|| format!("failed to open ledger {}", config.queue_state_file.display()))?,
    );
    let history = Arc::new(CreationHistoryStore::open(&config.creation_history_file).await?);

    // --- Events ---
    let events = Arc::new(EventBus::new(config.event_channel_capacity));
    let logger = tokio::spawn(EventLogger::run(events.subscribe()));

    // --- Shutdown ---
    let registry = Arc::new(RunRegistry::new());
    {
        let registry = registry.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let active = registry.active_operations().await.len();
                tracing::info!(
                    active = active,
                    "Ctrl-C received, finishing the current batch"
                );
                registry.shutdown();
            }
        });
    }

    for entry in ledger.get_all_queues().await {
        tracing::info!(
            entry_id = %entry.id,
            account_ref = %entry.account_ref,
            range = %entry.prompt_range,
            completed = entry.completed_count,
            remaining = entry.remaining(),
            progress_percent = entry.progress_percent(),
            status = %entry.status,
            "Queue entry"
        );
    }
    let pending = ledger.get_pending_queues().await;
    let resumable = ledger.get_resumable_queues().await;
    tracing::info!(
        pending = pending.len(),
        resumable = resumable.len(),
        free_slots = ledger.available_prompt_slots().await,
        "Ledger loaded"
    );

    if config.dry_run && !resumable.is_empty() {
        let operation_id = uuid::Uuid::new_v4();
        let cancel = registry.register(operation_id).await;

        let engine = BatchEngine::new(
            ledger.clone(),
            Arc::new(DryRunFactory::new(config.pacing)),
            events.clone(),
        )
        .with_history(history.clone());

        let ids: Vec<_> = resumable.iter().map(|e| e.id).collect();
        let report = engine.run(operation_id, &ids, &cancel).await;
        registry.complete(operation_id).await;
        let report = report?;
        tracing::info!(
            operation_id = %operation_id,
            succeeded = report.succeeded(),
            failed = report.failed(),
            skipped = report.skipped.len(),
            cancelled = report.cancelled,
            "Dry run finished"
        );
    }

    if let Some(account) = &config.download_account {
        let operation_id = uuid::Uuid::new_v4();
        let cancel = registry.register(operation_id).await;
        if !cancel.is_cancelled() {
            let downloads = Arc::new(DownloadHistoryStore::open(&config.download_history_file).await?);
            let feed = match &config.download_profile {
                Some(profile) => Feed::Profile(profile.clone()),
                None => Feed::Own,
            };
            // Resume an interrupted walk of the same listing.
            let previous = downloads.get(account).await;
            let start_page = if previous.last_profile == feed.label() {
                previous.current_page
            } else {
                1
            };
            let mut request = DownloadRequest::new(account.clone(), feed, &config.download_dir);
            request.start_page = start_page;

            let manager = DownloadManager::new(
                Arc::new(StudioApi::new(config.session_token.clone())?.with_cancellation(cancel.clone())),
                downloads,
            )
            .with_events(events.clone());
            let stats = manager.run(&request, &cancel).await;
            registry.complete(operation_id).await;
            let stats = stats?;
            tracing::info!(
                account_ref = %account,
                success = stats.success,
                failed = stats.failed,
                skipped = stats.skipped,
                "Downloads finished"
            );
        }
    }

    drop(events);
    let logged = logger.await.unwrap_or(0);
    tracing::info!(events = logged, "Worker stopped");
    Ok(())
}

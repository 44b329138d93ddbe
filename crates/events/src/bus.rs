//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is shared via `Arc<EventBus>` between the batch engine, the
//! download manager and whatever is watching them. A slow or absent
//! subscriber never slows a publisher down: lagging receivers lose the
//! oldest events instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tunefleet_core::queue::QueueStatus;
use tunefleet_core::types::{OperationId, QueueId};

// ---------------------------------------------------------------------------
// EventKind
// ---------------------------------------------------------------------------

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    RunStarted {
        entry_ids: Vec<QueueId>,
    },

    /// One prompt's outcome was observed and its progress persisted.
    PromptCompleted {
        entry_id: QueueId,
        prompt_index: u32,
        completed: u32,
        total: u32,
        status: QueueStatus,
        success: bool,
    },

    /// A single prompt failed inside a batch. The run continues.
    ItemFailed {
        entry_id: QueueId,
        prompt_index: u32,
        reason: String,
    },

    BatchCompleted {
        entry_id: QueueId,
        completed: u32,
        total: u32,
        batch_index: u32,
        batch_count: u32,
    },

    StatusChanged {
        entry_id: QueueId,
        from: QueueStatus,
        to: QueueStatus,
    },

    /// A selected id was not executed (unknown or already completed).
    EntrySkipped {
        entry_id: QueueId,
        reason: String,
    },

    RunFinished {
        entries: u32,
        succeeded: u32,
        failed: u32,
        cancelled: bool,
    },

    DownloadProgress {
        account_ref: String,
        clip_id: String,
        success: u32,
        failed: u32,
        skipped: u32,
    },

    DownloadFinished {
        account_ref: String,
        success: u32,
        failed: u32,
        skipped: u32,
        cancelled: bool,
    },
}

impl EventKind {
    /// Dot-separated name, e.g. `"queue.prompt_completed"`.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run.started",
            Self::PromptCompleted { .. } => "queue.prompt_completed",
            Self::ItemFailed { .. } => "queue.item_failed",
            Self::BatchCompleted { .. } => "queue.batch_completed",
            Self::StatusChanged { .. } => "queue.status_changed",
            Self::EntrySkipped { .. } => "queue.entry_skipped",
            Self::RunFinished { .. } => "run.finished",
            Self::DownloadProgress { .. } => "download.progress",
            Self::DownloadFinished { .. } => "download.finished",
        }
    }

    /// The queue entry this event concerns, if any.
    pub fn entry_id(&self) -> Option<QueueId> {
        match self {
            Self::PromptCompleted { entry_id, .. }
            | Self::ItemFailed { entry_id, .. }
            | Self::BatchCompleted { entry_id, .. }
            | Self::StatusChanged { entry_id, .. }
            | Self::EntrySkipped { entry_id, .. } => Some(*entry_id),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// FleetEvent
// ---------------------------------------------------------------------------

/// A timestamped [`EventKind`], optionally tied to an execution run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetEvent {
    /// The run that produced the event; `None` for download events.
    pub operation_id: Option<OperationId>,

    #[serde(flatten)]
    pub kind: EventKind,

    /// When the event was created (UTC).
    pub timestamp: DateTime<Utc>,
}

impl FleetEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            operation_id: None,
            kind,
            timestamp: Utc::now(),
        }
    }

    /// Tie the event to an execution run.
    pub fn for_operation(mut self, operation_id: OperationId) -> Self {
        self.operation_id = Some(operation_id);
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
pub const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// ```rust
/// use tunefleet_events::bus::{EventBus, EventKind, FleetEvent};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(FleetEvent::new(EventKind::RunStarted { entry_ids: vec![] }));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<FleetEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity (at least 1).
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: FleetEvent) {
        // A SendError only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn batch_event(entry_id: QueueId, batch_index: u32) -> FleetEvent {
        FleetEvent::new(EventKind::BatchCompleted {
            entry_id,
            completed: (batch_index + 1) * 2,
            total: 6,
            batch_index,
            batch_count: 3,
        })
    }

    #[tokio::test]
    async fn publish_and_receive_single_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let entry = uuid::Uuid::new_v4();
        let op = uuid::Uuid::new_v4();

        bus.publish(batch_event(entry, 0).for_operation(op));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.operation_id, Some(op));
        assert_eq!(received.kind.entry_id(), Some(entry));
        assert_eq!(received.kind.event_type(), "queue.batch_completed");
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(FleetEvent::new(EventKind::RunStarted { entry_ids: vec![] }));

        assert_eq!(rx1.recv().await.unwrap().kind.event_type(), "run.started");
        assert_eq!(rx2.recv().await.unwrap().kind.event_type(), "run.started");
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(FleetEvent::new(EventKind::RunStarted { entry_ids: vec![] }));
    }

    #[tokio::test]
    async fn lagging_subscriber_loses_oldest_events() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        let entry = uuid::Uuid::new_v4();
        for i in 0..4 {
            bus.publish(batch_event(entry, i));
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(2))
        ));
        let next = rx.recv().await.unwrap();
        assert!(matches!(next.kind, EventKind::BatchCompleted { batch_index: 2, .. }));
    }

    #[test]
    fn event_serializes_flat_with_type_tag() {
        let entry = uuid::Uuid::new_v4();
        let event = FleetEvent::new(EventKind::StatusChanged {
            entry_id: entry,
            from: QueueStatus::Pending,
            to: QueueStatus::InProgress,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "status_changed");
        assert_eq!(json["to"], "in_progress");
        assert!(json["operation_id"].is_null());

        let back: FleetEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}

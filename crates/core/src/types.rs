/// Queue entries are identified by random v4 UUIDs, never reused.
pub type QueueId = uuid::Uuid;

/// Identifies one execution run (a single `BatchEngine::run` call).
pub type OperationId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

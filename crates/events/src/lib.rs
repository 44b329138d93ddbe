//! Progress reporting for batch runs and downloads.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`. Publishing never blocks.
//! - [`FleetEvent`]: the event envelope: optional operation id, timestamp
//!   and an [`EventKind`] payload.
//! - [`EventLogger`]: background task that mirrors every event into
//!   `tracing`.

pub mod bus;
pub mod logger;

pub use bus::{EventBus, EventKind, FleetEvent};
pub use logger::EventLogger;

//! Durable JSON storage for the allocation ledger and its side histories.
//!
//! Every file is rewritten whole on each mutation through
//! [`fs::write_json_atomic`], so a concurrent reader sees either the old or
//! the new snapshot and never a torn one.

pub mod error;
pub mod fs;
pub mod repositories;
pub mod snapshot;
pub mod store;

pub use error::StoreError;
pub use repositories::{CreationHistoryStore, DownloadHistoryStore};
pub use snapshot::{LedgerSnapshot, SNAPSHOT_VERSION};
pub use store::{JsonFileStore, LedgerStore, MemoryStore};

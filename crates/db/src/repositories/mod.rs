//! File-backed stores for the histories kept beside the ledger.
//!
//! Each store owns one JSON file, caches its contents in memory, and
//! rewrites the file atomically after every mutation.

pub mod creation_history_repo;
pub mod download_history_repo;

pub use creation_history_repo::CreationHistoryStore;
pub use download_history_repo::DownloadHistoryStore;

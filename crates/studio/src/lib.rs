//! Client side of the remote creative service.
//!
//! - [`StudioApi`]: `reqwest` client with bearer-token auth, a minimum
//!   spacing between requests and exponential backoff on `429`.
//! - [`Clip`]: the parts of the service's clip JSON we use.
//! - [`DownloadManager`]: page-by-page artifact retrieval that consults
//!   the per-account dedup ledger before every fetch.

pub mod api;
pub mod clip;
pub mod download;
pub mod rate_limit;

pub use api::{StudioApi, StudioApiError};
pub use clip::Clip;
pub use download::{ArtifactSource, DownloadManager, DownloadRequest, DownloadStats, Feed};
pub use rate_limit::RateLimiter;

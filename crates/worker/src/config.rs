use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use tunefleet_core::pacing::PacingPolicy;
use tunefleet_events::bus::DEFAULT_CAPACITY;

/// Worker configuration loaded from environment variables.
///
/// Every field has a default suitable for local use.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub data_dir: PathBuf,
    /// Ledger snapshot.
    pub queue_state_file: PathBuf,
    pub creation_history_file: PathBuf,
    /// Per-account download dedup ledger.
    pub download_history_file: PathBuf,
    /// Drive resumable entries through the dry-run session on startup.
    pub dry_run: bool,
    pub pacing: PacingPolicy,
    pub event_channel_capacity: usize,
    /// Account whose library is downloaded on startup, if any.
    pub download_account: Option<String>,
    /// Public profile to download instead of the account's own feed.
    pub download_profile: Option<String>,
    pub download_dir: PathBuf,
    pub session_token: Option<String>,
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                  | Default                                |
    /// |--------------------------|----------------------------------------|
    /// | `DATA_DIR`               | `data`                                 |
    /// | `QUEUE_STATE_FILE`       | `$DATA_DIR/queue_state.json`           |
    /// | `CREATION_HISTORY_FILE`  | `$DATA_DIR/song_creation_history.json` |
    /// | `DOWNLOAD_HISTORY_FILE`  | `$DATA_DIR/download_history.json`      |
    /// | `WORKER_DRY_RUN`         | `false`                                |
    /// | `PACING_MIN_MS`          | `3000`                                 |
    /// | `PACING_MAX_MS`          | `5000`                                 |
    /// | `EVENT_CHANNEL_CAPACITY` | `1024`                                 |
    /// | `DOWNLOAD_ACCOUNT`       | unset                                  |
    /// | `DOWNLOAD_PROFILE`       | unset                                  |
    /// | `DOWNLOAD_DIR`           | `$DATA_DIR/downloads`                  |
    /// | `STUDIO_SESSION_TOKEN`   | unset                                  |
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let data_dir = PathBuf::from(var("DATA_DIR").unwrap_or_else(|| "data".into()));
        let file = |key: &str, default: &str| {
            var(key)
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join(default))
        };

        let queue_state_file = file("QUEUE_STATE_FILE", "queue_state.json");
        let creation_history_file = file("CREATION_HISTORY_FILE", "song_creation_history.json");
        let download_history_file = file("DOWNLOAD_HISTORY_FILE", "download_history.json");
        let download_dir = file("DOWNLOAD_DIR", "downloads");

        let dry_run = match var("WORKER_DRY_RUN").as_deref() {
            None => false,
            Some(v) => parse_bool(v).with_context(|| format!("WORKER_DRY_RUN must be a boolean, got {v:?}"))?,
        };

        let pacing_min: u64 = parse_or(&var, "PACING_MIN_MS", 3000)?;
        let pacing_max: u64 = parse_or(&var, "PACING_MAX_MS", 5000)?;
        let pacing = PacingPolicy {
            item_delay_min: Duration::from_millis(pacing_min),
            item_delay_max: Duration::from_millis(pacing_max),
            ..PacingPolicy::default()
        };
        pacing.validate().context("invalid PACING_MIN_MS / PACING_MAX_MS")?;

        let event_channel_capacity = parse_or(&var, "EVENT_CHANNEL_CAPACITY", DEFAULT_CAPACITY)?;

        Ok(Self {
            data_dir,
            queue_state_file,
            creation_history_file,
            download_history_file,
            dry_run,
            pacing,
            event_channel_capacity,
            download_account: var("DOWNLOAD_ACCOUNT"),
            download_profile: var("DOWNLOAD_PROFILE"),
            download_dir,
            session_token: var("STUDIO_SESSION_TOKEN"),
        })
    }
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{key} must be a valid number, got {raw:?}")),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

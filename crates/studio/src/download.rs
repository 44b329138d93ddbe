//! Page-by-page artifact retrieval with per-account dedup.
//!
//! [`DownloadManager::run`] walks the chosen feed one page at a time. Every
//! clip id is checked against the account's [`DownloadHistory`] before any
//! request is made, and each successful download is recorded durably before
//! the next one starts, so an interrupted run never fetches the same clip
//! twice. After a page is finished the page cursor is saved, and it is
//! reset to the first page once the listing is exhausted.
//!
//! [`DownloadHistory`]: tunefleet_core::history::DownloadHistory

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tunefleet_core::backoff::RateLimitConfig;
use tunefleet_db::{DownloadHistoryStore, StoreError};
use tunefleet_events::{EventBus, EventKind, FleetEvent};

use crate::api::{StudioApi, StudioApiError};
use crate::clip::Clip;
use crate::rate_limit::RateLimiter;

/// Which listing to download from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feed {
    /// The signed-in account's own library.
    Own,
    /// A public profile, with or without a leading `@`.
    Profile(String),
}

impl Feed {
    /// Value stored as `last_profile` in the download history.
    pub fn label(&self) -> &str {
        match self {
            Self::Own => "",
            Self::Profile(name) => name.trim_start_matches('@'),
        }
    }
}

/// Where clips come from and how their audio is fetched.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    async fn fetch_page(&self, feed: &Feed, page: u32) -> Result<Vec<Clip>, StudioApiError>;

    async fn download(
        &self,
        clip: &Clip,
        directory: &Path,
        append_id: bool,
    ) -> Result<PathBuf, StudioApiError>;
}

#[async_trait]
impl ArtifactSource for StudioApi {
    async fn fetch_page(&self, feed: &Feed, page: u32) -> Result<Vec<Clip>, StudioApiError> {
        match feed {
            Feed::Own => self.fetch_feed_page(page).await,
            Feed::Profile(name) => self.fetch_profile_page(name, page).await,
        }
    }

    async fn download(
        &self,
        clip: &Clip,
        directory: &Path,
        append_id: bool,
    ) -> Result<PathBuf, StudioApiError> {
        // Listings can predate the audio render; the clip itself may have it by now.
        if clip.audio_url.is_none() {
            if let Some(fresh) = self.fetch_clip(&clip.id).await? {
                return self.download_audio(&fresh, directory, append_id).await;
            }
        }
        self.download_audio(clip, directory, append_id).await
    }
}

/// Parameters of one download run.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub account_ref: String,
    pub feed: Feed,
    pub output_dir: PathBuf,
    /// First page to fetch (1-based). `0` is treated as `1`.
    pub start_page: u32,
    /// Stop after this many pages. `None` walks until an empty page.
    pub max_pages: Option<u32>,
    /// Stop after this many successful downloads.
    pub max_clips: Option<u32>,
    /// Append `__ID__{clip_id}` to file names.
    pub append_id: bool,
}

impl DownloadRequest {
    pub fn new(account_ref: impl Into<String>, feed: Feed, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            account_ref: account_ref.into(),
            feed,
            output_dir: output_dir.into(),
            start_page: 1,
            max_pages: None,
            max_clips: None,
            append_id: true,
        }
    }
}

/// Counters for a finished (or stopped) download run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DownloadStats {
    pub success: u32,
    pub failed: u32,
    /// Clips already in the dedup ledger.
    pub skipped: u32,
    pub pages: u32,
    pub cancelled: bool,
}

/// Drives an [`ArtifactSource`] against the dedup ledger.
pub struct DownloadManager {
    source: Arc<dyn ArtifactSource>,
    history: Arc<DownloadHistoryStore>,
    events: Option<Arc<EventBus>>,
    limiter: RateLimiter,
}

impl DownloadManager {
    pub fn new(source: Arc<dyn ArtifactSource>, history: Arc<DownloadHistoryStore>) -> Self {
        Self {
            source,
            history,
            events: None,
            limiter: RateLimiter::default(),
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Spacing between consecutive downloads.
    pub fn with_rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.limiter = RateLimiter::new(config);
        self
    }

    /// Download every clip of `req.feed` not yet recorded for the account.
    ///
    /// Individual download failures are counted and the run moves on. A page
    /// that cannot be fetched ends the run. Only a failure to persist the
    /// dedup ledger is returned as an error.
    pub async fn run(
        &self,
        req: &DownloadRequest,
        cancel: &CancellationToken,
    ) -> Result<DownloadStats, StoreError> {
        let account = req.account_ref.as_str();
        let mut stats = DownloadStats::default();
        let mut page = req.start_page.max(1);

        tracing::info!(
            account_ref = account,
            feed = ?req.feed,
            start_page = page,
            output_dir = %req.output_dir.display(),
            "Download run starting"
        );

        'pages: loop {
            if req.max_pages.is_some_and(|max| stats.pages >= max) {
                break;
            }
            if cancel.is_cancelled() {
                stats.cancelled = true;
                break;
            }

            let clips = match self.source.fetch_page(&req.feed, page).await {
                Ok(clips) => clips,
                Err(e) => {
                    tracing::warn!(account_ref = account, page, error = %e, "Failed to fetch page, stopping");
                    break;
                }
            };
            if clips.is_empty() {
                // Walk complete; the next run starts from the newest page.
                tracing::info!(account_ref = account, page, "No more clips");
                self.history.set_cursor(account, 1, req.feed.label()).await?;
                break;
            }
            stats.pages += 1;
            tracing::debug!(account_ref = account, page, clips = clips.len(), "Fetched page");

            for clip in &clips {
                if req.max_clips.is_some_and(|max| stats.success >= max) {
                    break 'pages;
                }
                if cancel.is_cancelled() {
                    stats.cancelled = true;
                    break 'pages;
                }

                if self.history.is_downloaded(account, &clip.id).await {
                    stats.skipped += 1;
                    tracing::debug!(account_ref = account, clip_id = %clip.id, "Already downloaded, skipping");
                    self.progress(account, &clip.id, &stats);
                    continue;
                }

                self.limiter.acquire().await;
                match self.source.download(clip, &req.output_dir, req.append_id).await {
                    Ok(path) => {
                        self.history.mark_downloaded(account, &clip.id).await?;
                        stats.success += 1;
                        tracing::info!(
                            account_ref = account,
                            clip_id = %clip.id,
                            path = %path.display(),
                            "Clip downloaded"
                        );
                    }
                    Err(e) => {
                        stats.failed += 1;
                        tracing::warn!(account_ref = account, clip_id = %clip.id, error = %e, "Clip download failed");
                    }
                }
                self.progress(account, &clip.id, &stats);
            }

            page += 1;
            self.history
                .set_cursor(account, page, req.feed.label())
                .await?;
        }

        tracing::info!(
            account_ref = account,
            success = stats.success,
            failed = stats.failed,
            skipped = stats.skipped,
            pages = stats.pages,
            cancelled = stats.cancelled,
            "Download run finished"
        );
        self.emit(EventKind::DownloadFinished {
            account_ref: account.to_string(),
            success: stats.success,
            failed: stats.failed,
            skipped: stats.skipped,
            cancelled: stats.cancelled,
        });
        Ok(stats)
    }

    fn progress(&self, account: &str, clip_id: &str, stats: &DownloadStats) {
        self.emit(EventKind::DownloadProgress {
            account_ref: account.to_string(),
            clip_id: clip_id.to_string(),
            success: stats.success,
            failed: stats.failed,
            skipped: stats.skipped,
        });
    }

    fn emit(&self, kind: EventKind) {
        if let Some(bus) = &self.events {
            bus.publish(FleetEvent::new(kind));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;

    use assert_matches::assert_matches;

    fn clip(id: &str) -> Clip {
        Clip {
            id: id.into(),
            title: format!("Track {id}"),
            audio_url: Some(format!("https://cdn.example/{id}.mp3")),
            image_url: None,
            tags: String::new(),
            created_at: None,
            duration: None,
        }
    }

    #[derive(Default)]
    struct MockSource {
        pages: Vec<Vec<Clip>>,
        broken: HashSet<String>,
        page_error_at: Option<u32>,
        fetched_pages: Mutex<Vec<u32>>,
        downloaded: Mutex<Vec<String>>,
    }

    impl MockSource {
        fn with_pages(pages: &[&[&str]]) -> Self {
            Self {
                pages: pages
                    .iter()
                    .map(|ids| ids.iter().map(|id| clip(id)).collect())
                    .collect(),
                ..Default::default()
            }
        }

        fn downloaded(&self) -> Vec<String> {
            self.downloaded.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ArtifactSource for MockSource {
        async fn fetch_page(&self, _feed: &Feed, page: u32) -> Result<Vec<Clip>, StudioApiError> {
            self.fetched_pages.lock().unwrap().push(page);
            if self.page_error_at == Some(page) {
                return Err(StudioApiError::ApiError {
                    status: 500,
                    body: "boom".into(),
                });
            }
            Ok(self
                .pages
                .get(page as usize - 1)
                .cloned()
                .unwrap_or_default())
        }

        async fn download(
            &self,
            clip: &Clip,
            directory: &Path,
            _append_id: bool,
        ) -> Result<PathBuf, StudioApiError> {
            if self.broken.contains(&clip.id) {
                return Err(StudioApiError::MissingAudio(clip.id.clone()));
            }
            self.downloaded.lock().unwrap().push(clip.id.clone());
            Ok(directory.join(format!("{}.mp3", clip.id)))
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        history: Arc<DownloadHistoryStore>,
    }

    impl Fixture {
        async fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let history = Arc::new(
                DownloadHistoryStore::open(dir.path().join("download_history.json"))
                    .await
                    .unwrap(),
            );
            Self { dir, history }
        }

        fn manager(&self, source: Arc<MockSource>) -> DownloadManager {
            DownloadManager::new(source, self.history.clone()).with_rate_limit(RateLimitConfig {
                min_interval: Duration::ZERO,
            })
        }

        fn request(&self) -> DownloadRequest {
            DownloadRequest::new("acct", Feed::Own, self.dir.path().join("out"))
        }
    }

    #[tokio::test]
    async fn downloads_every_page_until_empty() {
        let fx = Fixture::new().await;
        let source = Arc::new(MockSource::with_pages(&[&["a", "b"], &["c"]]));

        let stats = fx
            .manager(source.clone())
            .run(&fx.request(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            stats,
            DownloadStats {
                success: 3,
                pages: 2,
                ..Default::default()
            }
        );
        assert_eq!(source.downloaded(), vec!["a", "b", "c"]);
        assert_eq!(*source.fetched_pages.lock().unwrap(), vec![1, 2, 3]);

        let history = fx.history.get("acct").await;
        assert_eq!(history.total_downloaded, 3);
        assert_eq!(history.current_page, 1);
    }

    #[tokio::test]
    async fn already_downloaded_clips_are_skipped() {
        let fx = Fixture::new().await;
        fx.history.mark_downloaded("acct", "b").await.unwrap();
        let source = Arc::new(MockSource::with_pages(&[&["a", "b", "c"]]));

        let stats = fx
            .manager(source.clone())
            .run(&fx.request(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!((stats.success, stats.skipped), (2, 1));
        assert_eq!(source.downloaded(), vec!["a", "c"]);

        // A second pass finds nothing new.
        let again = fx
            .manager(source.clone())
            .run(&fx.request(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!((again.success, again.skipped), (0, 3));
        assert_eq!(source.downloaded().len(), 2);
    }

    #[tokio::test]
    async fn failed_download_is_counted_and_not_recorded() {
        let fx = Fixture::new().await;
        let mut source = MockSource::with_pages(&[&["a", "bad", "c"]]);
        source.broken.insert("bad".into());

        let stats = fx
            .manager(Arc::new(source))
            .run(&fx.request(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!((stats.success, stats.failed), (2, 1));
        assert!(!fx.history.is_downloaded("acct", "bad").await);
    }

    #[tokio::test]
    async fn page_error_stops_the_run() {
        let fx = Fixture::new().await;
        let mut source = MockSource::with_pages(&[&["a"], &["b"], &["c"]]);
        source.page_error_at = Some(2);
        let source = Arc::new(source);

        let stats = fx
            .manager(source.clone())
            .run(&fx.request(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!((stats.success, stats.pages), (1, 1));
        assert_eq!(source.downloaded(), vec!["a"]);
        assert_eq!(fx.history.get("acct").await.current_page, 2);
    }

    #[tokio::test]
    async fn limits_stop_early() {
        let fx = Fixture::new().await;
        let source = Arc::new(MockSource::with_pages(&[&["a", "b"], &["c", "d"], &["e"]]));

        let mut req = fx.request();
        req.max_clips = Some(3);
        let stats = fx.manager(source.clone()).run(&req, &CancellationToken::new()).await.unwrap();
        assert_eq!(stats.success, 3);
        assert_eq!(source.downloaded(), vec!["a", "b", "c"]);

        let mut req = fx.request();
        req.max_pages = Some(1);
        req.start_page = 3;
        let stats = fx.manager(source.clone()).run(&req, &CancellationToken::new()).await.unwrap();
        assert_eq!((stats.success, stats.pages), (1, 1));
        assert_eq!(source.downloaded().last().map(String::as_str), Some("e"));
    }

    #[tokio::test]
    async fn cancelled_run_downloads_nothing() {
        let fx = Fixture::new().await;
        let source = Arc::new(MockSource::with_pages(&[&["a"]]));
        let token = CancellationToken::new();
        token.cancel();

        let stats = fx.manager(source.clone()).run(&fx.request(), &token).await.unwrap();

        assert!(stats.cancelled);
        assert!(source.downloaded().is_empty());
        assert!(source.fetched_pages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn progress_and_finish_events_are_published() {
        let fx = Fixture::new().await;
        let bus = Arc::new(EventBus::new(16));
        let mut rx = bus.subscribe();
        let source = Arc::new(MockSource::with_pages(&[&["a", "b"]]));

        fx.manager(source)
            .with_events(bus.clone())
            .run(&fx.request(), &CancellationToken::new())
            .await
            .unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind);
        }
        assert_eq!(kinds.len(), 3);
        assert_matches!(&kinds[1], EventKind::DownloadProgress { clip_id, success: 2, .. } if clip_id == "b");
        assert_matches!(
            &kinds[2],
            EventKind::DownloadFinished { success: 2, failed: 0, skipped: 0, cancelled: false, .. }
        );
    }

    #[test]
    fn profile_label_drops_at_sign() {
        assert_eq!(Feed::Profile("@dj".into()).label(), "dj");
        assert_eq!(Feed::Own.label(), "");
    }
}

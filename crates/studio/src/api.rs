//! REST API client for the creative service.
//!
//! Every request goes through the [`RateLimiter`] first. A `429` response
//! is retried after an exponentially growing, capped delay; any other
//! non-2xx status is returned as [`StudioApiError::ApiError`]. Backoff
//! waits end early when the client's cancellation token fires.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tunefleet_core::backoff::{delay_for_attempt, BackoffConfig, RateLimitConfig};

use crate::clip::Clip;
use crate::rate_limit::RateLimiter;

/// Production API root.
pub const DEFAULT_BASE_URL: &str = "https://studio-api.prod.suno.com/api";

/// Longest file stem kept by [`sanitize_filename`].
const MAX_FILENAME_CHARS: usize = 200;

/// Per-request timeout, covering connect through the end of the body.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors from the service API layer.
#[derive(Debug, thiserror::Error)]
pub enum StudioApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code other than 429.
    #[error("Studio API error ({status}): {body}")]
    ApiError { status: u16, body: String },

    /// Still rate limited after every retry.
    #[error("Rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    /// Cancelled while waiting to retry.
    #[error("Request cancelled")]
    Cancelled,

    #[error("Clip {0} has no audio URL")]
    MissingAudio(String),

    #[error("I/O error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// HTTP client bound to one account's session token.
pub struct StudioApi {
    client: reqwest::Client,
    base_url: String,
    session_token: Option<String>,
    limiter: RateLimiter,
    backoff: BackoffConfig,
    cancel: CancellationToken,
}

impl StudioApi {
    /// Client against the production API with [`REQUEST_TIMEOUT`].
    pub fn new(session_token: Option<String>) -> Result<Self, StudioApiError> {
        Self::with_timeout(session_token, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(session_token: Option<String>, timeout: Duration) -> Result<Self, StudioApiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, DEFAULT_BASE_URL.to_string(), session_token))
    }

    /// Reuse an existing [`reqwest::Client`] against a custom API root.
    pub fn with_client(client: reqwest::Client, base_url: String, session_token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            session_token,
            limiter: RateLimiter::default(),
            backoff: BackoffConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.limiter = RateLimiter::new(config);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Abort backoff waits once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// One page of the signed-in account's own feed (`GET /feed/v2`).
    pub async fn fetch_feed_page(&self, page: u32) -> Result<Vec<Clip>, StudioApiError> {
        let body = self.get_json("/feed/v2", &[("page", page.to_string())]).await?;
        Ok(Clip::list_from_page(&body))
    }

    /// One page of a public profile (`GET /profiles/{name}/clips`). A
    /// leading `@` on the profile name is ignored.
    pub async fn fetch_profile_page(&self, profile: &str, page: u32) -> Result<Vec<Clip>, StudioApiError> {
        let endpoint = profile_endpoint(profile);
        let body = self.get_json(&endpoint, &[("page", page.to_string())]).await?;
        Ok(Clip::list_from_page(&body))
    }

    /// A single clip by id (`GET /clips/{id}`). `None` if the response
    /// carries no clip id.
    pub async fn fetch_clip(&self, clip_id: &str) -> Result<Option<Clip>, StudioApiError> {
        let body = self.get_json(&format!("/clips/{clip_id}"), &[]).await?;
        Ok(Clip::from_api(&body))
    }

    /// Stream the clip's audio into `directory` and return the written path.
    ///
    /// The file is named after the sanitized title, with `__ID__{id}`
    /// appended when `append_id` is set, and never overwrites an existing
    /// file. The body is streamed into a `.part` sibling that is renamed
    /// into place only once complete, and removed on failure.
    pub async fn download_audio(
        &self,
        clip: &Clip,
        directory: &Path,
        append_id: bool,
    ) -> Result<PathBuf, StudioApiError> {
        let url = clip
            .audio_url
            .as_deref()
            .ok_or_else(|| StudioApiError::MissingAudio(clip.id.clone()))?;

        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| StudioApiError::Io { path, source }
        };

        tokio::fs::create_dir_all(directory)
            .await
            .map_err(io_err(directory))?;
        let path = unique_path(directory, &audio_file_stem(clip, append_id), "mp3").await;

        let response = self
            .send_with_backoff(|| self.client.get(url))
            .await?;
        let mut response = Self::ensure_success(response).await?;

        let part = part_path(&path);
        let written = match stream_to_file(&mut response, &part).await {
            Ok(written) => written,
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&part).await {
                    tracing::warn!(path = %part.display(), error = %cleanup, "Failed to remove partial download");
                }
                return Err(e);
            }
        };
        tokio::fs::rename(&part, &path).await.map_err(io_err(&path))?;

        tracing::info!(clip_id = %clip.id, path = %path.display(), bytes = written, "Audio downloaded");
        Ok(path)
    }

    // ---- private helpers ----

    async fn get_json(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<serde_json::Value, StudioApiError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let response = self
            .send_with_backoff(|| {
                let request = self.client.get(&url).query(query);
                match &self.session_token {
                    Some(token) => request.bearer_auth(token),
                    None => request,
                }
            })
            .await?;
        let response = Self::ensure_success(response).await?;
        Ok(response.json().await?)
    }

    /// Send the request built by `build`, retrying `429` responses with
    /// exponential backoff.
    async fn send_with_backoff(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, StudioApiError> {
        let mut attempt = 0;
        loop {
            self.limiter.acquire().await;
            let response = build().send().await?;
            if response.status() != reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Ok(response);
            }

            attempt += 1;
            if attempt > self.backoff.max_retries {
                tracing::error!(attempts = attempt, url = %response.url(), "Still rate limited, giving up");
                return Err(StudioApiError::RateLimited { attempts: attempt });
            }
            let delay = delay_for_attempt(attempt, &self.backoff);
            tracing::warn!(
                attempt,
                delay_secs = delay.as_secs(),
                url = %response.url(),
                "Rate limited (429), backing off"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(StudioApiError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`StudioApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, StudioApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(StudioApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

async fn stream_to_file(response: &mut reqwest::Response, path: &Path) -> Result<u64, StudioApiError> {
    let io_err = |source: std::io::Error| StudioApiError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = tokio::fs::File::create(path).await.map_err(io_err)?;
    let mut written: u64 = 0;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await.map_err(io_err)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(io_err)?;
    Ok(written)
}

/// `song.mp3` -> `song.mp3.part`.
fn part_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

fn profile_endpoint(profile: &str) -> String {
    format!("/profiles/{}/clips", profile.trim().trim_start_matches('@'))
}

fn audio_file_stem(clip: &Clip, append_id: bool) -> String {
    let title = sanitize_filename(&clip.title);
    if append_id {
        format!("{title}__ID__{}", clip.id)
    } else {
        title
    }
}

/// Strip characters that are invalid in Windows or Unix file names, trim
/// leading and trailing dots and spaces, and cap the length.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') && !c.is_control())
        .collect();
    let trimmed: String = cleaned
        .trim_matches(|c| c == '.' || c == ' ')
        .chars()
        .take(MAX_FILENAME_CHARS)
        .collect();
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed
    }
}

/// `directory/stem.ext`, or `directory/stem (n).ext` for the first free `n`.
async fn unique_path(directory: &Path, stem: &str, ext: &str) -> PathBuf {
    let candidate = directory.join(format!("{stem}.{ext}"));
    if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
        return candidate;
    }
    let mut n = 1;
    loop {
        let candidate = directory.join(format!("{stem} ({n}).{ext}"));
        if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return candidate;
        }
        n += 1;
    }
}

//! Minimum spacing between requests to the service.

use tokio::sync::Mutex;
use tokio::time::Instant;
use tunefleet_core::backoff::{remaining_interval, RateLimitConfig};

/// Serialises callers so consecutive requests are at least
/// `min_interval` apart.
pub struct RateLimiter {
    config: RateLimitConfig,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            last: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Wait until a request may be sent, then claim the slot.
    pub async fn acquire(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let wait = remaining_interval(prev.elapsed(), &self.config);
            if !wait.is_zero() {
                tracing::trace!(wait_ms = wait.as_millis() as u64, "Rate limiter delaying request");
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

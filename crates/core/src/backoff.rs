//! Exponential backoff and request spacing for the remote creative service.
//!
//! [`BackoffConfig`] drives retries after rate-limit (`429`) responses;
//! [`RateLimitConfig`] sets the minimum spacing between any two requests.

use std::time::Duration;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each rate-limited response.
    pub multiplier: f64,
    /// Retries allowed after the first attempt before giving up.
    pub max_retries: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            max_retries: 3,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`BackoffConfig::max_delay`].
pub fn next_delay(current: Duration, config: &BackoffConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Delay to wait before retry number `attempt` (1-based).
pub fn delay_for_attempt(attempt: u32, config: &BackoffConfig) -> Duration {
    let mut delay = config.initial_delay.min(config.max_delay);
    for _ in 1..attempt {
        delay = next_delay(delay, config);
    }
    delay
}

/// Minimum spacing between consecutive requests to the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub min_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(2),
        }
    }
}

/// How long to wait so that at least `min_interval` separates a request
/// from the previous one, given `elapsed` since that previous request.
pub fn remaining_interval(elapsed: Duration, config: &RateLimitConfig) -> Duration {
    config.min_interval.saturating_sub(elapsed)
}

//! Human-like pacing windows used by automation sessions.
//!
//! The batch engine never sleeps on its own; sessions draw their delays from
//! a [`PacingPolicy`] so the randomisation lives next to the actions it
//! disguises.

use std::time::Duration;

use rand::Rng;

use crate::error::CoreError;

/// Default lower bound between two item submissions.
pub const DEFAULT_ITEM_DELAY_MIN: Duration = Duration::from_millis(3000);

/// Default upper bound between two item submissions.
pub const DEFAULT_ITEM_DELAY_MAX: Duration = Duration::from_millis(5000);

/// Default window waited right before pressing submit.
pub const DEFAULT_SUBMIT_DELAY_MIN: Duration = Duration::from_millis(2000);
pub const DEFAULT_SUBMIT_DELAY_MAX: Duration = Duration::from_millis(5000);

/// Randomised delay windows, each sampled uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingPolicy {
    pub item_delay_min: Duration,
    pub item_delay_max: Duration,
    pub submit_delay_min: Duration,
    pub submit_delay_max: Duration,
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self {
            item_delay_min: DEFAULT_ITEM_DELAY_MIN,
            item_delay_max: DEFAULT_ITEM_DELAY_MAX,
            submit_delay_min: DEFAULT_SUBMIT_DELAY_MIN,
            submit_delay_max: DEFAULT_SUBMIT_DELAY_MAX,
        }
    }
}

impl PacingPolicy {
    /// A policy with every window set to zero. Used by tests and dry runs
    /// that should not wait.
    pub fn immediate() -> Self {
        Self {
            item_delay_min: Duration::ZERO,
            item_delay_max: Duration::ZERO,
            submit_delay_min: Duration::ZERO,
            submit_delay_max: Duration::ZERO,
        }
    }

    /// Reject windows whose minimum exceeds their maximum.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.item_delay_min > self.item_delay_max {
            return Err(CoreError::Validation(format!(
                "item delay min {:?} exceeds max {:?}",
                self.item_delay_min, self.item_delay_max
            )));
        }
        if self.submit_delay_min > self.submit_delay_max {
            return Err(CoreError::Validation(format!(
                "submit delay min {:?} exceeds max {:?}",
                self.submit_delay_min, self.submit_delay_max
            )));
        }
        Ok(())
    }

    /// Sample the pause taken between two items.
    pub fn item_delay(&self) -> Duration {
        sample(self.item_delay_min, self.item_delay_max)
    }

    /// Sample the pause taken before submitting a filled form.
    pub fn submit_delay(&self) -> Duration {
        sample(self.submit_delay_min, self.submit_delay_max)
    }
}

/// Uniformly sample a duration in `[min, max]` at millisecond resolution.
pub fn sample(min: Duration, max: Duration) -> Duration {
    let lo = min.as_millis() as u64;
    let hi = max.as_millis() as u64;
    if hi <= lo {
        return min;
    }
    Duration::from_millis(rand::rng().random_range(lo..=hi))
}

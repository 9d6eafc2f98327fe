//! Backoff between attempts of a failed job.

use std::time::Duration;

use courier_common::ConfigError;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Shortest delay ever returned, so a released job is never immediately
/// reservable again.
const MIN_DELAY: Duration = Duration::from_millis(1);

/// Exponential backoff with jitter.
///
/// The delay before attempt `n + 1`, after `n` failed attempts, is
/// `min(base * 2^(n - 1), max) * (1 ± jitter)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay after the first failure, in seconds.
    ///
    /// Default: 10 seconds
    #[serde(default = "defaults::base_delay_secs")]
    pub base_delay_secs: f64,

    /// Upper bound on the delay, in seconds.
    ///
    /// Default: 3600 seconds (1 hour)
    #[serde(default = "defaults::max_delay_secs")]
    pub max_delay_secs: f64,

    /// Randomizes delays within ±`jitter_factor` so jobs that failed together
    /// do not all retry together.
    ///
    /// Default: 0.1 (±10%)
    #[serde(default = "defaults::jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_secs: defaults::base_delay_secs(),
            max_delay_secs: defaults::max_delay_secs(),
            jitter_factor: defaults::jitter_factor(),
        }
    }
}

impl RetryPolicy {
    /// A policy without jitter, mostly useful for tests.
    pub fn fixed(base: Duration, max: Duration) -> Self {
        Self {
            base_delay_secs: base.as_secs_f64(),
            max_delay_secs: max.as_secs_f64(),
            jitter_factor: 0.0,
        }
    }

    /// # Errors
    /// A [`ConfigError`] naming the first field out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.base_delay_secs.is_finite() || self.base_delay_secs <= 0.0 {
            return Err(ConfigError::invalid(
                "base_delay_secs",
                "must be greater than 0",
            ));
        }
        if !self.max_delay_secs.is_finite() || self.max_delay_secs < self.base_delay_secs {
            return Err(ConfigError::invalid(
                "max_delay_secs",
                "must be at least base_delay_secs",
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::invalid(
                "jitter_factor",
                "must be between 0.0 and 1.0",
            ));
        }
        Ok(())
    }

    /// Delay before the next attempt of a job that has been tried `attempts`
    /// times. Always positive.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(62);
        #[allow(clippy::cast_precision_loss)]
        let multiplier = (1u64 << exponent) as f64;
        let delay = (self.base_delay_secs * multiplier).min(self.max_delay_secs);

        let jittered = if self.jitter_factor > 0.0 {
            let jitter_range = delay * self.jitter_factor;
            let mut rng = rand::rng();
            delay + rng.random_range(-jitter_range..=jitter_range)
        } else {
            delay
        };

        Duration::try_from_secs_f64(jittered)
            .unwrap_or(MIN_DELAY)
            .max(MIN_DELAY)
    }
}

mod defaults {
    pub const fn base_delay_secs() -> f64 {
        10.0
    }

    pub const fn max_delay_secs() -> f64 {
        3600.0
    }

    pub const fn jitter_factor() -> f64 {
        0.1
    }
}

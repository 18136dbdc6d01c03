//! Exponential backoff for failed status checks.
//!
//! After a failed check the poll loop waits [`BackoffConfig::initial_delay`]
//! before the next one, growing by [`BackoffConfig::multiplier`] on every
//! further consecutive failure and clamped to [`BackoffConfig::max_delay`].
//! A successful check resets the delay.

use std::time::Duration;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Delay to wait after `consecutive_failures` failed checks in a row.
///
/// Returns `Duration::ZERO` when nothing has failed.
pub fn delay_after(consecutive_failures: u32, config: &BackoffConfig) -> Duration {
    if consecutive_failures == 0 {
        return Duration::ZERO;
    }
    let mut delay = config.initial_delay.min(config.max_delay);
    for _ in 1..consecutive_failures {
        if delay >= config.max_delay {
            break;
        }
        delay = grow(delay, config);
    }
    delay
}

fn grow(delay: Duration, config: &BackoffConfig) -> Duration {
    delay.mul_f64(config.multiplier.max(1.0)).min(config.max_delay)
}

//! Retry policy for transient task failures

use paperscout_common::config::TaskSettings;
use rand::Rng;
use std::time::Duration;

/// Exponential backoff with jitter. Only transient failures are retried;
/// fatal failures terminate immediately.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempt budget, including the first attempt
    pub max_attempts: u32,
    pub base: Duration,
    pub factor: f64,
    /// Fractional jitter applied symmetrically, e.g. 0.25 for +/- 25%
    pub jitter: f64,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base: Duration::from_secs(1),
            factor: 2.0,
            jitter: 0.25,
            cap: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &TaskSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base: Duration::from_millis(settings.backoff_base_ms),
            cap: Duration::from_millis(settings.backoff_cap_ms),
            ..Self::default()
        }
    }

    /// Delay before the next attempt, given how many attempts have already
    /// run (1-based).
    pub fn delay(&self, attempts_so_far: u32) -> Duration {
        let exponent = attempts_so_far.saturating_sub(1);
        let raw = self.base.as_secs_f64() * self.factor.powi(exponent as i32);
        let capped = raw.min(self.cap.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
        Duration::from_secs_f64(capped * jitter)
    }
}

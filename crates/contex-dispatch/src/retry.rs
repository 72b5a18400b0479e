//! Exponential backoff with jitter for webhook retries.

use std::time::Duration;

use rand::Rng;

use contex_core::defaults::{
    WEBHOOK_BACKOFF_BASE_SECS, WEBHOOK_BACKOFF_CAP_SECS, WEBHOOK_BACKOFF_JITTER,
    WEBHOOK_MAX_ATTEMPTS,
};

/// Retry policy: `base * factor^attempt` with proportional jitter, capped.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts (initial + retries).
    pub max_attempts: u32,
    pub base_secs: f64,
    pub factor: f64,
    pub cap_secs: f64,
    /// Jitter fraction applied as ± on each delay.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: WEBHOOK_MAX_ATTEMPTS,
            base_secs: WEBHOOK_BACKOFF_BASE_SECS,
            factor: 2.0,
            cap_secs: WEBHOOK_BACKOFF_CAP_SECS,
            jitter: WEBHOOK_BACKOFF_JITTER,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Fast schedule for tests.
    pub fn fast() -> Self {
        Self {
            max_attempts: WEBHOOK_MAX_ATTEMPTS,
            base_secs: 0.005,
            factor: 2.0,
            cap_secs: 0.05,
            jitter: 0.0,
        }
    }

    /// Delay before the retry following `attempt` (0-indexed).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.base_secs * self.factor.powi(attempt as i32);
        let capped = exp.min(self.cap_secs);
        let jittered = if self.jitter > 0.0 {
            let spread = capped * self.jitter;
            capped + rand::thread_rng().gen_range(-spread..=spread)
        } else {
            capped
        };
        Duration::from_secs_f64(jittered.max(0.0))
    }
}

//! Bounded exponential backoff for registry availability polling.
//!
//! A plain loop with an internal clock; jitter is sampled from a uniform
//! distribution bounded by a fraction of the exponential delay.

use std::time::Duration;

/// Backoff parameters for the availability poll.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Multiplier applied per attempt.
    pub growth_factor: f64,
    /// Cap on any single delay.
    pub max_delay: Duration,
    /// Hard cap on poll attempts.
    pub max_attempts: u32,
    /// Additive jitter fraction: each delay is stretched by up to this much.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            growth_factor: 1.5,
            max_delay: Duration::from_secs(60),
            max_attempts: 30,
            jitter: 0.1,
        }
    }
}

impl BackoffPolicy {
    /// A policy with no delays, for tests that drive the poll loop.
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            growth_factor: 1.0,
            max_delay: Duration::ZERO,
            max_attempts: 5,
            jitter: 0.0,
        }
    }

    /// Delay to sleep after the given attempt (1-indexed), jitter included.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(40);
        let raw = self.base_delay.as_secs_f64() * self.growth_factor.powi(exponent as i32);
        let capped = raw.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(apply_jitter(capped, self.jitter))
    }
}

/// Stretch a delay by a random factor in `[1.0, 1.0 + jitter]`.
fn apply_jitter(delay_secs: f64, jitter: f64) -> f64 {
    if jitter <= 0.0 || delay_secs <= 0.0 {
        return delay_secs;
    }
    use rand::Rng;
    let random_value: f64 = rand::thread_rng().r#gen();
    delay_secs * (1.0 + random_value * jitter)
}

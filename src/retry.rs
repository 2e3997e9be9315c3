//! Retry policy: exponential backoff with optional jitter.
//!
//! A `RetryPolicy` is a pure function of attempt number to delay. It holds
//! no mutable state and is safe to share across concurrently executing
//! steps.

use rand::Rng as _;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> f64 {
    1.0
}

fn default_max_delay() -> f64 {
    60.0
}

fn default_exponential_base() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.1
}

/// Exponential backoff with bounded jitter.
///
/// `get_delay(attempt)` is deterministic modulo jitter: `base_delay *
/// exponential_base^(attempt - 1)`, capped at `max_delay`. `attempt` is
/// 1-based, matching the retry loop's first-attempt semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: f64,
    pub max_delay: f64,
    pub exponential_base: f64,
    /// Jitter fraction in `[0.0, 1.0]`; the delay is perturbed by up to
    /// `+/- jitter * delay`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            exponential_base: default_exponential_base(),
            jitter: default_jitter(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: f64, max_delay: f64) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            ..Default::default()
        }
    }

    /// Effective retry budget for a step, clamped by the engine-wide ceiling.
    ///
    /// The workflow loop never lets a step retry more than the engine's own
    /// policy allows, even if the step requests more.
    pub fn effective_retries(&self, engine_max: u32) -> u32 {
        self.max_retries.min(engine_max)
    }

    /// Delay before the given attempt, in seconds. `attempt` is 1-based.
    pub fn get_delay(&self, attempt: u32) -> f64 {
        let attempt = attempt.max(1);
        let mut delay = self.base_delay * self.exponential_base.powi(attempt as i32 - 1);

        if self.jitter > 0.0 {
            let jitter_range = delay * self.jitter;
            let offset = rand::rng().random_range(-jitter_range..=jitter_range);
            delay += offset;
        }

        delay.max(0.0).min(self.max_delay)
    }

    pub fn delay_duration(&self, attempt: u32) -> Duration {
        Duration::from_secs_f64(self.get_delay(attempt).max(0.0))
    }
}

//! Retry parameters and the backoff schedule.

use derive_getters::Getters;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Immutable retry policy for one provider.
///
/// # Example
///
/// ```toml
/// [providers.paced.retry]
/// max_retries = 3
/// base_delay_ms = 1000
/// max_delay_ms = 60000
/// jitter_ms = 1000
/// ```
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Getters,
    derive_builder::Builder,
)]
#[builder(default)]
pub struct RetryConfig {
    /// Attempts after the first one
    #[serde(default = "default_max_retries")]
    max_retries: u32,

    /// Backoff at attempt 0
    #[serde(default = "default_base_delay_ms")]
    base_delay_ms: u64,

    /// Upper bound for any single wait
    #[serde(default = "default_max_delay_ms")]
    max_delay_ms: u64,

    /// Uniform random extra delay, `0..=jitter_ms`
    #[serde(default = "default_jitter_ms")]
    jitter_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_jitter_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl RetryConfig {
    /// `min(base * 2^attempt, max) + uniform(0..=jitter)`, in milliseconds.
    ///
    /// # Example
    ///
    /// ```
    /// use pacer_rate_limit::RetryConfigBuilder;
    ///
    /// let retry = RetryConfigBuilder::default()
    ///     .base_delay_ms(100)
    ///     .max_delay_ms(1_000)
    ///     .jitter_ms(0)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(retry.backoff_ms(0), 100);
    /// assert_eq!(retry.backoff_ms(3), 800);
    /// assert_eq!(retry.backoff_ms(10), 1_000);
    /// ```
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let exponential = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        };
        exponential.saturating_add(jitter)
    }

    /// The larger of the provider's hint and our own backoff, capped at `max_delay_ms`.
    pub fn delay_for(&self, hinted_ms: u64, attempt: u32) -> Duration {
        let ms = hinted_ms.max(self.backoff_ms(attempt)).min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

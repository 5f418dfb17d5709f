use clap::ValueEnum;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// What the forwarding loop does with a record whose write failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Drop the record and reconnect before the next one
    Drop,
    /// Reconnect with backoff and rewrite, up to the attempt budget
    #[default]
    Retry,
    /// Reconnect with backoff and rewrite until it succeeds or shutdown
    Block,
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryMode::Drop => f.write_str("drop"),
            DeliveryMode::Retry => f.write_str("retry"),
            DeliveryMode::Block => f.write_str("block"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Backoff schedule for reconnect-and-rewrite after a failed write.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    mode: DeliveryMode,
}

impl RetryPolicy {
    pub fn new(mode: DeliveryMode, config: RetryConfig) -> Self {
        Self { config, mode }
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    /// Whether another attempt is allowed after `attempts` failed ones.
    pub fn should_retry(&self, attempts: u32) -> bool {
        match self.mode {
            DeliveryMode::Drop => false,
            DeliveryMode::Retry => attempts < self.config.max_attempts,
            DeliveryMode::Block => true,
        }
    }

    /// Exponential backoff from `base_delay`, capped at `max_delay`, with ±50% jitter.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        Self::apply_jitter(self.backoff_ceiling(attempt))
    }

    fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let base_millis = self.config.base_delay.as_millis() as u64;
        let multiplier = 2_u64.checked_pow(attempt).unwrap_or(u64::MAX);
        let delay = Duration::from_millis(base_millis.saturating_mul(multiplier));
        std::cmp::min(delay, self.config.max_delay)
    }

    fn apply_jitter(delay: Duration) -> Duration {
        let mut rng = rand::rng();
        let jitter_factor = rng.random_range(0.5..1.5); // ±50% jitter
        let jittered_millis = (delay.as_millis() as f64 * jitter_factor) as u64;
        Duration::from_millis(jittered_millis)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DeliveryMode::default(), RetryConfig::default())
    }
}

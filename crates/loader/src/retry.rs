//! Retry configuration shared by every transport.

use insights_core::config::LoaderConfig;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff with candidate rotation and optional cache fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total fetch attempts, first one included.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    /// Randomise each delay by ±25%.
    pub jitter: bool,
    /// Serve the last cached payload when every attempt failed.
    pub cache_fallback: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 8000,
            backoff_multiplier: 2.0,
            jitter: true,
            cache_fallback: true,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &LoaderConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff_ms: config.initial_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
            cache_fallback: config.cache_fallback,
            ..Default::default()
        }
    }

    /// Delay before the retry that follows failed attempt `attempt` (0-indexed).
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped_ms = base_ms.min(self.max_backoff_ms as f64);

        let final_ms = if self.jitter {
            capped_ms * rand::thread_rng().gen_range(0.75..1.25)
        } else {
            capped_ms
        };

        Duration::from_millis(final_ms as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 500,
            backoff_multiplier: 2.0,
            jitter: false,
            cache_fallback: false,
        };

        assert_eq!(policy.backoff_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.backoff_for_attempt(3), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let delay = policy.backoff_for_attempt(0).as_millis();
            assert!((750..1250).contains(&delay), "{delay}");
        }
    }

    #[test]
    fn test_from_config_never_zero_attempts() {
        let config = LoaderConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert_eq!(RetryPolicy::from_config(&config).max_attempts, 1);
    }
}

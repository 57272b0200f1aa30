//! Resilience configuration
//!
//! Unified configuration for retry policies and comparison concurrency,
//! with defaults and a preset for tests.

use super::retry::RetryConfig;
use std::time::Duration;

/// Permit count used when limiting is disabled (Tokio Semaphore max is 2^61-1)
const UNBOUNDED_PERMITS: usize = 1_000_000;

/// Resilience configuration for read operations
#[derive(Debug, Clone, Default)]
pub struct ResilienceConfig {
    pub retry: RetryConfig,
    pub concurrency: ConcurrencyConfig,
}

/// Concurrency limiting configuration
#[derive(Debug, Clone)]
pub struct ConcurrencyConfig {
    /// Upper bound on concurrent comparisons
    pub max_concurrent: usize,
    /// When disabled only the connection budgets bound the pool
    pub enabled: bool,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            enabled: true,
        }
    }
}

impl ConcurrencyConfig {
    pub fn effective_limit(&self) -> usize {
        if self.enabled {
            self.max_concurrent.max(1)
        } else {
            UNBOUNDED_PERMITS
        }
    }
}

impl ResilienceConfig {
    /// Build from the `[compare]` and `[retry]` sections of the config file
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            retry: RetryConfig {
                max_attempts: config.retry.max_attempts.max(1),
                base_delay: Duration::from_millis(config.retry.initial_delay_ms),
                max_delay: Duration::from_millis(config.retry.max_delay_ms),
                backoff_multiplier: config.retry.backoff_multiplier,
            },
            concurrency: ConcurrencyConfig {
                max_concurrent: config.compare.max_concurrent,
                enabled: config.compare.max_concurrent > 0,
            },
        }
    }

    /// No retries, no delay (for testing)
    pub fn disabled() -> Self {
        Self {
            retry: RetryConfig {
                max_attempts: 1,
                base_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
                backoff_multiplier: 1.0,
            },
            concurrency: ConcurrencyConfig::default(),
        }
    }
}

//! Resilience features for snapshot reads
//!
//! Provides retry with exponential backoff for transient read failures and
//! a semaphore-based limiter bounding concurrent comparisons.

pub mod concurrency;
pub mod config;
pub mod retry;

pub use concurrency::{ConcurrencyLimiter, ConcurrencyStats};
pub use config::{ConcurrencyConfig, ResilienceConfig};
pub use retry::{RetryConfig, RetryPolicy, RetryableError};

//! Concurrency limiter implementation
//!
//! Provides a semaphore-based limiter for bounding concurrent comparisons.
//! Each comparison holds a live connection on both snapshots, so the pool
//! is never larger than the smaller of the two connection budgets.

use super::config::ConcurrencyConfig;
use log::debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// Semaphore-based limiter for concurrent comparison workers
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    acquired: Arc<AtomicU64>,
    waited: Arc<AtomicU64>,
}

impl ConcurrencyLimiter {
    /// Create a limiter from configuration alone
    pub fn new(config: &ConcurrencyConfig) -> Self {
        Self::with_permits(config.effective_limit())
    }

    /// Create a limiter sized to the configuration and both connection budgets
    pub fn for_connections(config: &ConcurrencyConfig, source: usize, target: usize) -> Self {
        let permits = config.effective_limit().min(source).min(target).max(1);
        debug!(
            "Comparison pool sized to {} (config {}, source {}, target {})",
            permits,
            config.effective_limit(),
            source,
            target
        );
        Self::with_permits(permits)
    }

    fn with_permits(permits: usize) -> Self {
        let permits = permits.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            max_concurrent: permits,
            acquired: Arc::new(AtomicU64::new(0)),
            waited: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Acquire a permit, waiting if the pool is at capacity.
    /// The permit releases automatically when dropped.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        if self.semaphore.available_permits() == 0 {
            self.waited.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Concurrency limiter: waiting for permit ({} in use)",
                self.max_concurrent
            );
        }

        let permit = self.semaphore.clone().acquire_owned().await?;
        self.acquired.fetch_add(1, Ordering::Relaxed);
        Ok(permit)
    }

    /// Try to acquire a permit without waiting
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        let permit = self.semaphore.clone().try_acquire_owned().ok()?;
        self.acquired.fetch_add(1, Ordering::Relaxed);
        Some(permit)
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn stats(&self) -> ConcurrencyStats {
        ConcurrencyStats {
            available_permits: self.available_permits(),
            max_concurrent: self.max_concurrent,
            acquired: self.acquired.load(Ordering::Relaxed),
            waited: self.waited.load(Ordering::Relaxed),
        }
    }
}

/// Statistics for the concurrency limiter
#[derive(Debug, Clone)]
pub struct ConcurrencyStats {
    pub available_permits: usize,
    pub max_concurrent: usize,
    /// Total permits acquired since creation
    pub acquired: u64,
    /// Number of times a worker had to wait for a permit
    pub waited: u64,
}

impl ConcurrencyStats {
    pub fn in_use(&self) -> usize {
        self.max_concurrent.saturating_sub(self.available_permits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max: usize) -> ConcurrencyConfig {
        ConcurrencyConfig {
            max_concurrent: max,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_limiter_max_permits() {
        let limiter = ConcurrencyLimiter::new(&config(3));

        let p1 = limiter.try_acquire();
        let p2 = limiter.try_acquire();
        let p3 = limiter.try_acquire();
        let p4 = limiter.try_acquire();

        assert!(p1.is_some());
        assert!(p2.is_some());
        assert!(p3.is_some());
        assert!(p4.is_none());
        assert_eq!(limiter.available_permits(), 0);
    }

    #[tokio::test]
    async fn test_limiter_release() {
        let limiter = ConcurrencyLimiter::new(&config(2));

        let p1 = limiter.try_acquire().unwrap();
        let _p2 = limiter.try_acquire().unwrap();
        assert!(limiter.try_acquire().is_none());

        drop(p1);
        assert!(limiter.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_limiter_acquire_waits() {
        let limiter = ConcurrencyLimiter::new(&config(1));
        let limiter_clone = limiter.clone();

        let permit = limiter.acquire().await.unwrap();
        assert_eq!(limiter.available_permits(), 0);

        let handle = tokio::spawn(async move {
            let _permit = limiter_clone.acquire().await.unwrap();
            true
        });

        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
        drop(permit);

        let result = tokio::time::timeout(tokio::time::Duration::from_millis(100), handle).await;
        assert!(result.is_ok());
        assert_eq!(limiter.stats().waited, 1);
    }

    #[test]
    fn test_pool_sized_to_smallest_budget() {
        let limiter = ConcurrencyLimiter::for_connections(&config(8), 4, 2);
        assert_eq!(limiter.max_concurrent(), 2);

        let limiter = ConcurrencyLimiter::for_connections(&config(3), 10, 10);
        assert_eq!(limiter.max_concurrent(), 3);
    }

    #[test]
    fn test_pool_never_empty() {
        let limiter = ConcurrencyLimiter::for_connections(&config(4), 0, 5);
        assert_eq!(limiter.max_concurrent(), 1);
    }

    #[test]
    fn test_disabled_falls_back_to_connection_budget() {
        let disabled = ConcurrencyConfig {
            max_concurrent: 2,
            enabled: false,
        };
        let limiter = ConcurrencyLimiter::for_connections(&disabled, 6, 5);
        assert_eq!(limiter.max_concurrent(), 5);
    }
}

//! Per-user request rate limiting
//!
//! A fixed 60-second window counter gates the actions that hit downstream
//! systems (name search, exam-number lookup, student selection). Navigation
//! is never limited. The limiter fails open: if the counter backend errors,
//! the request is admitted — this gate protects capacity, not correctness.

use async_trait::async_trait;
use moka::future::Cache;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::config::RATE_LIMIT_WINDOW_SECS;
use crate::session::StoreError;

/// Atomic increment-and-expire counter, one slot per user.
///
/// The window is fixed: the TTL runs from the first increment, so a burst
/// straddling a window boundary can admit up to twice the nominal limit.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CountingCache: Send + Sync {
    /// Increment the user's counter and return the post-increment value
    async fn increment(&self, user_id: i64) -> Result<u32, StoreError>;
}

/// In-process [`CountingCache`] over a moka cache.
///
/// Entries hold an `Arc<AtomicU32>` so increments never touch the cache's
/// write path: the TTL keeps running from entry creation, which is exactly
/// the increment-plus-expire-if-unset window contract.
pub struct MokaCounterCache {
    counters: Cache<i64, Arc<AtomicU32>>,
}

impl Default for MokaCounterCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(RATE_LIMIT_WINDOW_SECS))
    }
}

impl MokaCounterCache {
    /// Counter cache with a custom window, mainly for tests
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            counters: Cache::builder()
                .max_capacity(500_000)
                .time_to_live(window)
                .build(),
        }
    }
}

#[async_trait]
impl CountingCache for MokaCounterCache {
    async fn increment(&self, user_id: i64) -> Result<u32, StoreError> {
        let counter = self
            .counters
            .get_with(user_id, async { Arc::new(AtomicU32::new(0)) })
            .await;
        Ok(counter.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Admission decision over a [`CountingCache`]
pub struct RateLimiter {
    cache: Arc<dyn CountingCache>,
    max_per_window: u32,
}

impl RateLimiter {
    /// Limiter admitting `max_per_window` actions per user per window
    #[must_use]
    pub fn new(cache: Arc<dyn CountingCache>, max_per_window: u32) -> Self {
        Self {
            cache,
            max_per_window,
        }
    }

    /// Whether this action is admitted for the user.
    ///
    /// Fails open on counter errors.
    pub async fn allow(&self, user_id: i64) -> bool {
        match self.cache.increment(user_id).await {
            Ok(count) => count <= self.max_per_window,
            Err(e) => {
                warn!("rate-limit counter unavailable for user {user_id}: {e}");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: u32) -> RateLimiter {
        RateLimiter::new(Arc::new(MokaCounterCache::default()), max)
    }

    #[tokio::test]
    async fn test_admits_up_to_limit_then_blocks() {
        let limiter = limiter(3);
        assert!(limiter.allow(1).await);
        assert!(limiter.allow(1).await);
        assert!(limiter.allow(1).await);
        assert!(!limiter.allow(1).await);
    }

    #[tokio::test]
    async fn test_users_are_independent() {
        let limiter = limiter(1);
        assert!(limiter.allow(1).await);
        assert!(!limiter.allow(1).await);
        assert!(limiter.allow(2).await);
    }

    #[tokio::test]
    async fn test_window_expiry_resets_counter() {
        let cache = Arc::new(MokaCounterCache::new(Duration::from_millis(50)));
        let limiter = RateLimiter::new(cache, 1);
        assert!(limiter.allow(7).await);
        assert!(!limiter.allow(7).await);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(limiter.allow(7).await);
    }

    #[tokio::test]
    async fn test_fails_open_on_cache_error() {
        let mut cache = MockCountingCache::new();
        cache
            .expect_increment()
            .returning(|_| Err(StoreError::Unavailable("down".into())));
        let limiter = RateLimiter::new(Arc::new(cache), 3);
        assert!(limiter.allow(1).await);
    }
}

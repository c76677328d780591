//! Generic helpers: retry policies and small string utilities.

use anyhow::Result;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::{Retry, RetryIf};
use tracing::warn;

/// An explicit retry schedule, passed by value to [`retry_with_policy`].
///
/// Keeping the schedule as data rather than baking it into each caller lets
/// every collaborator (Telegram sends, result-API lookups) share one retry
/// helper while tuning attempts and backoff independently.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: usize,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Ceiling for the exponential backoff
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Policy from millisecond tuning constants
    #[must_use]
    pub const fn from_millis(max_attempts: usize, initial_ms: u64, max_ms: u64) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::from_millis(initial_ms),
            max_backoff: Duration::from_millis(max_ms),
        }
    }

    fn strategy(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(self.initial_backoff.as_millis() as u64)
            .max_delay(self.max_backoff)
            .map(jitter)
            .take(self.max_attempts.saturating_sub(1))
    }
}

/// Retry an async operation with exponential backoff and jitter.
///
/// # Errors
///
/// Returns the last error once the policy's attempts are exhausted.
pub async fn retry_with_policy<F, Fut, T>(policy: RetryPolicy, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    Retry::spawn(policy.strategy(), operation).await.map_err(|e| {
        warn!(
            "operation failed after {} attempts: {}",
            policy.max_attempts, e
        );
        e
    })
}

/// Retry an async operation, but only while `should_retry` holds.
///
/// Non-retriable errors (e.g. a 404 from a lookup service) surface
/// immediately without burning the remaining attempts.
///
/// # Errors
///
/// Returns the first non-retriable error, or the last error once the
/// policy's attempts are exhausted.
pub async fn retry_with_policy_if<F, Fut, T, E, C>(
    policy: RetryPolicy,
    operation: F,
    should_retry: C,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    C: FnMut(&E) -> bool,
{
    RetryIf::spawn(policy.strategy(), operation, should_retry).await
}

/// Safely truncates a string to a maximum character length (not bytes).
///
/// # Examples
///
/// ```
/// use najah_bot::utils::truncate_str;
/// assert_eq!(truncate_str("عبدالله أحمد", 7), "عبدالله");
/// ```
pub fn truncate_str(s: impl AsRef<str>, max_chars: usize) -> String {
    let s = s.as_ref();
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.char_indices()
        .nth(max_chars)
        .map_or_else(|| s.to_string(), |(pos, _)| s[..pos].to_string())
}

/// Collapse all internal whitespace runs to single spaces and trim the ends.
#[must_use]
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_truncate_str_unicode() {
        assert_eq!(truncate_str("محمد علي", 4), "محمد");
        assert_eq!(truncate_str("ok", 50), "ok");
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  محمد   علي \n"), "محمد علي");
        assert_eq!(collapse_whitespace(""), "");
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::from_millis(3, 1, 2);
        let result = retry_with_policy(policy, || async {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(anyhow::anyhow!("transient"))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.expect("should recover"), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_if_stops_on_permanent_error() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::from_millis(5, 1, 2);
        let result: Result<(), &str> = retry_with_policy_if(
            policy,
            || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err("permanent")
            },
            |e: &&str| *e != "permanent",
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}

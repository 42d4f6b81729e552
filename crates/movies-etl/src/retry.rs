//! Retry with exponential backoff for store reads
//!
//! Only side-effect-free reads are wrapped: a retried call is issued again
//! with identical input.

use movies_rdbc::ErrorCategory;
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error};

use crate::error::{EtlError, Result};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first retry, before the multiplier is applied
    pub initial_delay: Duration,
    /// Multiplier for exponential backoff (2.0 doubles delay each retry)
    pub multiplier: f64,
    /// Upper bound for a single delay
    pub max_delay: Duration,
    /// Failed attempts tolerated before giving up
    pub max_attempts: u32,
    /// Error categories worth retrying
    pub retriable: HashSet<ErrorCategory>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            max_attempts: 50,
            retriable: [
                ErrorCategory::Connection,
                ErrorCategory::Timeout,
                ErrorCategory::Deadlock,
            ]
            .into_iter()
            .collect(),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail on the first error of any kind
    pub fn no_retry() -> Self {
        Self {
            retriable: HashSet::new(),
            ..Default::default()
        }
    }

    /// Set initial delay (builder pattern)
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set backoff multiplier (builder pattern)
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Set max delay (builder pattern)
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set max attempts (builder pattern)
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the retriable categories (builder pattern)
    pub fn with_retriable(mut self, categories: impl IntoIterator<Item = ErrorCategory>) -> Self {
        self.retriable = categories.into_iter().collect();
        self
    }

    /// Delay after the `attempt`-th failure (counted from 1)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // powi overflows to infinity long before the cap matters
        let exponent = attempt.min(64) as i32;
        let delay = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(Duration::ZERO)
    }

    /// Whether an error is worth retrying
    pub fn is_retriable(&self, err: &movies_rdbc::Error) -> bool {
        self.retriable.contains(&err.category())
    }
}

/// Run `operation` until it succeeds, retrying transient store errors.
///
/// Non-retriable errors are returned on first occurrence as
/// [`EtlError::Database`]. Once the failure count exceeds
/// `max_attempts` the last error is returned as
/// [`EtlError::RetriesExhausted`].
///
/// ```rust,ignore
/// let rows = retry(&RetryConfig::default(), || executor.fetch(&query)).await?;
/// ```
pub async fn retry<T, F, Fut>(config: &RetryConfig, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = movies_rdbc::Result<T>>,
{
    let mut attempt: u32 = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if config.is_retriable(&e) => {
                error!(attempt, category = %e.category(), "Transient store error: {}", e);

                if attempt > config.max_attempts {
                    return Err(EtlError::RetriesExhausted {
                        attempts: attempt,
                        source: e,
                    });
                }

                let delay = config.delay_for_attempt(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Backing off");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(EtlError::Database(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.initial_delay, Duration::from_millis(100));
        assert_eq!(config.max_attempts, 50);
        assert!(config.is_retriable(&movies_rdbc::Error::connection("reset")));
        assert!(!config.is_retriable(&movies_rdbc::Error::query("syntax")));
    }

    #[test]
    fn test_delay_for_attempt() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(config.delay_for_attempt(7), Duration::from_secs(10));
        assert_eq!(config.delay_for_attempt(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_sub_millisecond_delays_keep_precision() {
        let config = RetryConfig::default().with_initial_delay(Duration::from_micros(250));
        let close_to = |actual: Duration, micros: u64| {
            let expected = Duration::from_micros(micros);
            let diff = actual.max(expected) - actual.min(expected);
            assert!(diff < Duration::from_nanos(10), "{actual:?} != {expected:?}");
        };

        close_to(config.delay_for_attempt(1), 500);
        close_to(config.delay_for_attempt(2), 1_000);
    }

    fn failing(calls: Arc<AtomicU32>, failures: u32) -> impl FnMut() -> futures::future::Ready<movies_rdbc::Result<u32>> {
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= failures {
                futures::future::ready(Err(movies_rdbc::Error::connection("connection reset")))
            } else {
                futures::future::ready(Ok(n))
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers() {
        let calls = Arc::new(AtomicU32::new(0));
        let config = RetryConfig::default().with_max_attempts(5);

        let value = retry(&config, failing(calls.clone(), 2)).await.unwrap();
        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_without_extra_call() {
        let calls = Arc::new(AtomicU32::new(0));
        let config = RetryConfig::default()
            .with_max_attempts(2)
            .with_initial_delay(Duration::from_millis(10));

        let err = retry(&config, failing(calls.clone(), 3)).await.unwrap_err();
        match err {
            EtlError::RetriesExhausted { attempts, source } => {
                assert_eq!(attempts, 3);
                assert_eq!(source.category(), ErrorCategory::Connection);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retriable_propagates_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let err = retry(&RetryConfig::default(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(movies_rdbc::Error::query("relation does not exist")) }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, EtlError::Database(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sleeps() {
        let calls = Arc::new(AtomicU32::new(0));
        let config = RetryConfig::default().with_max_attempts(5);
        let start = tokio::time::Instant::now();

        retry(&config, failing(calls, 2)).await.unwrap();

        // 200ms after the first failure, 400ms after the second
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(600), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(700), "{elapsed:?}");
    }
}

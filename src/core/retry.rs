//! Retry logic for failed provider calls with exponential backoff.
//!
//! Provides configurable retry strategies for the acquisition pipeline with:
//! - A fixed attempt budget (`max_attempts` counts the first try)
//! - Exponential backoff with optional jitter, never a zero delay
//! - Per-error opt-out through the `Retryable` trait

use crate::core::config;
use crate::core::metrics;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Smallest delay ever slept between attempts.
const MIN_DELAY: Duration = Duration::from_millis(1);

/// Retry-related errors.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt failed
    #[error("Max attempts ({max_attempts}) exhausted")]
    MaxAttemptsExhausted { max_attempts: u32, last_error: E },

    /// The error was not worth retrying; no further attempts were made
    #[error("Non-retryable failure")]
    NotRetryable { last_error: E },
}

impl<E> RetryError<E> {
    /// Returns the error produced by the last attempt.
    pub fn into_last_error(self) -> E {
        match self {
            RetryError::MaxAttemptsExhausted { last_error, .. } => last_error,
            RetryError::NotRetryable { last_error } => last_error,
        }
    }
}

/// Retry strategy configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays
    pub add_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: config::retry::max_delay(),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the total attempt budget. Values below 1 are raised to 1.
    #[must_use]
    pub fn max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max.max(1);
        self
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Disables jitter.
    #[must_use]
    pub fn no_jitter(mut self) -> Self {
        self.add_jitter = false;
        self
    }

    /// Calculates the delay that follows failed attempt number `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay.as_secs_f64());

        let final_delay = if self.add_jitter {
            // Add up to 25% jitter
            let jitter = rand::random::<f64>() * 0.25 * capped_delay;
            capped_delay + jitter
        } else {
            capped_delay
        };

        // NaN or negative when the multiplier is not a positive number
        Duration::try_from_secs_f64(final_delay.max(0.0))
            .unwrap_or(self.max_delay)
            .max(MIN_DELAY)
    }
}

/// Predefined retry configs for each provider call.
impl RetryConfig {
    fn preset(attempts: u32, delay_ms: u64) -> Self {
        Self::new()
            .max_attempts(attempts)
            .initial_delay(Duration::from_millis(delay_ms))
    }

    /// Primary (yt-dlp) metadata lookup.
    pub fn primary_metadata() -> Self {
        Self::preset(
            config::retry::PRIMARY_METADATA_ATTEMPTS,
            config::retry::PRIMARY_METADATA_DELAY_MS,
        )
    }

    /// Primary (yt-dlp) audio/video download.
    pub fn primary_download() -> Self {
        Self::preset(
            config::retry::PRIMARY_DOWNLOAD_ATTEMPTS,
            config::retry::PRIMARY_DOWNLOAD_DELAY_MS,
        )
    }

    /// Secondary (innertube) metadata lookup.
    pub fn secondary_metadata() -> Self {
        Self::preset(
            config::retry::SECONDARY_METADATA_ATTEMPTS,
            config::retry::SECONDARY_METADATA_DELAY_MS,
        )
    }

    /// Secondary (innertube) stream opening.
    pub fn secondary_stream() -> Self {
        Self::preset(
            config::retry::SECONDARY_STREAM_ATTEMPTS,
            config::retry::SECONDARY_STREAM_DELAY_MS,
        )
    }
}

/// Result of a retried operation.
#[derive(Debug)]
pub struct RetryResult<T, E> {
    /// The final result (success or last error)
    pub result: Result<T, RetryError<E>>,
    /// Number of attempts made
    pub attempts: u32,
    /// Total time spent retrying
    pub total_duration: Duration,
}

impl<T, E> RetryResult<T, E> {
    /// Returns true if the operation succeeded.
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// Returns true if all attempts were used up.
    pub fn is_exhausted(&self) -> bool {
        matches!(self.result, Err(RetryError::MaxAttemptsExhausted { .. }))
    }

    /// Drops the retry bookkeeping and yields the value or the last error.
    pub fn into_result(self) -> Result<T, E> {
        self.result.map_err(RetryError::into_last_error)
    }
}

/// Determines if an error is retryable.
pub trait Retryable {
    /// Returns true if the error should be retried.
    fn is_retryable(&self) -> bool;

    /// Returns an optional hint for retry delay (e.g., from rate limit headers).
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for std::io::Error {
    fn is_retryable(&self) -> bool {
        use std::io::ErrorKind;
        matches!(
            self.kind(),
            ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::TimedOut
                | ErrorKind::Interrupted
                | ErrorKind::WouldBlock
        )
    }
}

/// Executes an async operation with retry logic.
///
/// The operation runs at most `config.max_attempts` times. A non-retryable error
/// ends the loop immediately. Between attempts the executor sleeps for
/// `config.delay_for_attempt(n)` (or the error's own `retry_after` hint).
///
/// # Arguments
/// * `config` - Retry configuration
/// * `operation_name` - Label used in logs and metrics
/// * `operation` - The async operation to execute
pub async fn retry<F, Fut, T, E>(config: &RetryConfig, operation_name: &str, mut operation: F) -> RetryResult<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let start = std::time::Instant::now();
    let max_attempts = config.max_attempts.max(1);
    let mut attempts = 0;

    loop {
        attempts += 1;

        match operation().await {
            Ok(value) => {
                if attempts > 1 {
                    log::info!("{} succeeded after {} attempt(s)", operation_name, attempts);
                }
                return RetryResult {
                    result: Ok(value),
                    attempts,
                    total_duration: start.elapsed(),
                };
            }
            Err(e) if !e.is_retryable() => {
                log::warn!("{} failed with a non-retryable error: {}", operation_name, e);
                return RetryResult {
                    result: Err(RetryError::NotRetryable { last_error: e }),
                    attempts,
                    total_duration: start.elapsed(),
                };
            }
            Err(e) if attempts < max_attempts => {
                metrics::RETRY_ATTEMPTS_TOTAL.with_label_values(&[operation_name]).inc();

                // Calculate delay (respect retry_after hint if provided)
                let delay = e
                    .retry_after()
                    .unwrap_or_else(|| config.delay_for_attempt(attempts - 1))
                    .max(MIN_DELAY);

                log::warn!(
                    "{} attempt {}/{} failed (retrying in {:?}): {}",
                    operation_name,
                    attempts,
                    max_attempts,
                    delay,
                    e
                );

                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                log::warn!(
                    "{} failed after {} attempt(s): {}",
                    operation_name,
                    attempts,
                    e
                );
                return RetryResult {
                    result: Err(RetryError::MaxAttemptsExhausted {
                        max_attempts,
                        last_error: e,
                    }),
                    attempts,
                    total_duration: start.elapsed(),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct TestError(bool); // bool = is_retryable

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "TestError(retryable={})", self.0)
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            self.0
        }
    }

    fn fast(attempts: u32) -> RetryConfig {
        RetryConfig::new()
            .max_attempts(attempts)
            .initial_delay(Duration::from_millis(5))
            .no_jitter()
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_try() {
        let result = retry(&fast(3), "op", || async { Ok::<_, TestError>(42) }).await;

        assert!(result.is_ok());
        assert_eq!(result.attempts, 1);
        assert_eq!(result.into_result().ok(), Some(42));
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry(&fast(3), "op", || {
            let counter = counter_clone.clone();
            async move {
                let attempt = counter.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 {
                    Err(TestError(true))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(result.attempts, 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted_counts_every_attempt() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry(&fast(2), "op", || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError(true))
            }
        })
        .await;

        assert!(result.is_exhausted());
        assert_eq!(result.attempts, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_immediately() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry(&fast(5), "op", || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError(false))
            }
        })
        .await;

        assert!(!result.is_exhausted());
        assert_eq!(result.attempts, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(matches!(result.into_result(), Err(TestError(false))));
    }

    #[test]
    fn test_zero_attempts_means_one() {
        assert_eq!(RetryConfig::new().max_attempts(0).max_attempts, 1);
    }

    #[test]
    fn test_delay_calculation() {
        let config = RetryConfig::new()
            .initial_delay(Duration::from_secs(1))
            .backoff_multiplier(2.0)
            .max_delay(Duration::from_secs(10))
            .no_jitter();

        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(config.delay_for_attempt(4), Duration::from_secs(10)); // capped
    }

    #[test]
    fn test_delay_is_never_zero() {
        let config = RetryConfig::new().initial_delay(Duration::ZERO).no_jitter();
        assert!(config.delay_for_attempt(0) > Duration::ZERO);
        assert!(config.delay_for_attempt(3) > Duration::ZERO);
    }

    #[test]
    fn test_bad_multiplier_stays_within_bounds() {
        for multiplier in [-2.0, f64::NAN, f64::NEG_INFINITY] {
            let config = RetryConfig::new()
                .initial_delay(Duration::from_secs(1))
                .backoff_multiplier(multiplier)
                .max_delay(Duration::from_secs(10));
            for attempt in 0..4 {
                let delay = config.delay_for_attempt(attempt);
                assert!(delay >= MIN_DELAY, "multiplier={} attempt={}", multiplier, attempt);
                assert!(delay <= Duration::from_secs_f64(12.5), "multiplier={} attempt={}", multiplier, attempt);
            }
        }
    }
}

//! Retry mechanisms for remote cloud calls.
//!
//! Retry policy is deliberately kept out of the provisioner and the
//! orchestration loops: both are handed a [`RetryPolicy`] value describing
//! max attempts, backoff and jitter, and ask it for the delay to apply
//! between attempts. This keeps every retry decision in one injectable
//! object instead of ad-hoc loops scattered through orchestration logic.
//!
//! # Example
//!
//! ```rust,ignore
//! use netforge::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::exponential(3, Duration::from_secs(1), Duration::from_secs(30));
//! let delay = policy.delay_for_attempt(1, None);
//! ```

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff strategy for calculating delay between retries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Constant delay between retries.
    Constant,

    /// Linear backoff: delay = initial_delay * (attempt + 1)
    Linear,

    /// Exponential backoff: delay = initial_delay * multiplier^attempt
    Exponential {
        /// Multiplier for exponential growth (default: 2.0)
        multiplier: f64,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential { multiplier: 2.0 }
    }
}

impl BackoffStrategy {
    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn calculate_delay(&self, attempt: u32, initial_delay: Duration) -> Duration {
        let base_millis = initial_delay.as_millis() as f64;

        let delay_millis = match self {
            Self::Constant => base_millis,
            Self::Linear => base_millis * (attempt as f64 + 1.0),
            Self::Exponential { multiplier } => base_millis * multiplier.powf(attempt as f64),
        };

        Duration::from_millis(delay_millis as u64)
    }
}

/// Jitter strategy for adding randomness to delays.
///
/// Jitter spreads retries out so that parallel runs hitting the same
/// throttled API do not all come back at exactly the same time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter - use exact calculated delay.
    None,

    /// Full jitter: random value between 0 and calculated delay.
    Full,

    /// Equal jitter: half the delay plus random jitter.
    Equal,
}

impl Default for JitterStrategy {
    fn default() -> Self {
        Self::Full
    }
}

impl JitterStrategy {
    /// Apply jitter to a calculated delay.
    pub fn apply(&self, delay: Duration) -> Duration {
        let mut rng = rand::thread_rng();
        let delay_millis = delay.as_millis() as f64;

        let jittered_millis = match self {
            Self::None => delay_millis,
            Self::Full => {
                if delay_millis > 0.0 {
                    rng.gen_range(0.0..delay_millis)
                } else {
                    0.0
                }
            }
            Self::Equal => {
                let half = delay_millis / 2.0;
                if half > 0.0 {
                    half + rng.gen_range(0.0..half)
                } else {
                    0.0
                }
            }
        };

        Duration::from_millis(jittered_millis.max(0.0) as u64)
    }
}

/// Retry policy configuration.
///
/// Defines how retries should be performed: maximum number of retries,
/// delay between retries, and backoff/jitter strategies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (0 means no retries, just the initial attempt).
    pub max_retries: u32,

    /// Initial delay before the first retry.
    pub initial_delay: Duration,

    /// Maximum delay between retries (caps exponential growth).
    pub max_delay: Duration,

    /// Backoff strategy for calculating delays.
    pub backoff: BackoffStrategy,

    /// Jitter strategy for adding randomness.
    pub jitter: JitterStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff: BackoffStrategy::default(),
            jitter: JitterStrategy::default(),
        }
    }
}

impl RetryPolicy {
    /// Create a policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Create a policy with simple constant delay retries.
    pub fn constant(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay: delay,
            max_delay: delay,
            backoff: BackoffStrategy::Constant,
            jitter: JitterStrategy::None,
        }
    }

    /// Create a policy with exponential backoff and full jitter.
    pub fn exponential(max_retries: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            backoff: BackoffStrategy::Exponential { multiplier: 2.0 },
            jitter: JitterStrategy::Full,
        }
    }

    /// Calculate the delay for a given attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay = self.backoff.calculate_delay(attempt, self.initial_delay);
        let capped_delay = base_delay.min(self.max_delay);
        self.jitter.apply(capped_delay)
    }

    /// Check if retrying should continue based on attempt count.
    pub fn should_continue(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Execute an async operation with retry logic.
    ///
    /// Returns the result of the operation, or the last error if all
    /// retries fail. Every error is retried; callers that must only retry
    /// a subset of errors (the orchestrator retries transients only)
    /// drive [`delay_for_attempt`](Self::delay_for_attempt) themselves.
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Debug,
    {
        let mut attempt = 0;

        loop {
            debug!("Attempt {} of {}", attempt + 1, self.max_retries + 1);

            match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!("Operation succeeded after {} retry attempts", attempt);
                    }
                    return Ok(result);
                }
                Err(e) => {
                    warn!("Attempt {} failed: {:?}", attempt + 1, e);

                    if !self.should_continue(attempt) {
                        return Err(RetryError::MaxRetriesExceeded {
                            attempts: attempt + 1,
                            last_error: e,
                        });
                    }

                    let delay = self.delay_for_attempt(attempt);
                    debug!("Waiting {:?} before retry", delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Execute an async operation until a success condition holds.
    ///
    /// Used for remote-side polling, e.g. waiting for a NAT gateway to
    /// report `available` before the next step may depend on it. The
    /// operation is re-run until the condition returns true, max retries
    /// are exhausted, or the operation itself fails terminally.
    pub async fn execute_until<F, Fut, T, E, C>(
        &self,
        mut operation: F,
        success_condition: C,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Debug,
        C: Fn(&T) -> bool,
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => {
                    if success_condition(&result) {
                        return Ok(result);
                    }

                    if !self.should_continue(attempt) {
                        return Err(RetryError::ConditionNotMet {
                            attempts: attempt + 1,
                        });
                    }
                }
                Err(e) => {
                    warn!("Attempt {} failed with error: {:?}", attempt + 1, e);

                    if !self.should_continue(attempt) {
                        return Err(RetryError::MaxRetriesExceeded {
                            attempts: attempt + 1,
                            last_error: e,
                        });
                    }
                }
            }

            let delay = self.delay_for_attempt(attempt);
            debug!("Waiting {:?} before re-polling", delay);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Error type for retry operations.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Maximum number of retries exceeded.
    MaxRetriesExceeded {
        /// Number of attempts made.
        attempts: u32,
        /// The last error encountered.
        last_error: E,
    },

    /// Success condition was never met.
    ConditionNotMet {
        /// Number of attempts made.
        attempts: u32,
    },
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryError::MaxRetriesExceeded {
                attempts,
                last_error,
            } => {
                write!(
                    f,
                    "Max retries exceeded after {} attempts. Last error: {}",
                    attempts, last_error
                )
            }
            RetryError::ConditionNotMet { attempts } => {
                write!(f, "Success condition not met after {} attempts", attempts)
            }
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RetryError::MaxRetriesExceeded { last_error, .. } => Some(last_error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_backoff_constant() {
        let strategy = BackoffStrategy::Constant;
        let initial = Duration::from_secs(1);

        assert_eq!(strategy.calculate_delay(0, initial), Duration::from_secs(1));
        assert_eq!(strategy.calculate_delay(5, initial), Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_linear() {
        let strategy = BackoffStrategy::Linear;
        let initial = Duration::from_secs(1);

        assert_eq!(strategy.calculate_delay(0, initial), Duration::from_secs(1));
        assert_eq!(strategy.calculate_delay(1, initial), Duration::from_secs(2));
        assert_eq!(strategy.calculate_delay(2, initial), Duration::from_secs(3));
    }

    #[test]
    fn test_backoff_exponential() {
        let strategy = BackoffStrategy::Exponential { multiplier: 2.0 };
        let initial = Duration::from_secs(1);

        assert_eq!(strategy.calculate_delay(0, initial), Duration::from_secs(1));
        assert_eq!(strategy.calculate_delay(1, initial), Duration::from_secs(2));
        assert_eq!(strategy.calculate_delay(2, initial), Duration::from_secs(4));
        assert_eq!(strategy.calculate_delay(3, initial), Duration::from_secs(8));
    }

    #[test]
    fn test_jitter_none() {
        let strategy = JitterStrategy::None;
        let delay = Duration::from_secs(10);

        assert_eq!(strategy.apply(delay), delay);
    }

    #[test]
    fn test_jitter_full_range() {
        let strategy = JitterStrategy::Full;
        let delay = Duration::from_secs(10);

        for _ in 0..100 {
            assert!(strategy.apply(delay) <= delay);
        }
    }

    #[test]
    fn test_jitter_equal_range() {
        let strategy = JitterStrategy::Equal;
        let delay = Duration::from_secs(10);

        for _ in 0..100 {
            let result = strategy.apply(delay);
            assert!(result >= delay / 2);
            assert!(result <= delay);
        }
    }

    #[test]
    fn test_retry_policy_delay_capping() {
        let policy = RetryPolicy {
            max_retries: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff: BackoffStrategy::Exponential { multiplier: 2.0 },
            jitter: JitterStrategy::None,
        };

        assert!(policy.delay_for_attempt(10) <= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_try() {
        let policy = RetryPolicy::constant(3, Duration::from_millis(10));
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result: Result<i32, RetryError<&str>> = policy
            .execute(|| {
                let c = counter_clone.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let policy = RetryPolicy::constant(3, Duration::from_millis(10));
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result: Result<i32, RetryError<&str>> = policy
            .execute(|| {
                let c = counter_clone.clone();
                async move {
                    let attempt = c.fetch_add(1, Ordering::SeqCst);
                    if attempt < 2 {
                        Err("throttled")
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let policy = RetryPolicy::constant(2, Duration::from_millis(10));
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result: Result<i32, RetryError<&str>> = policy
            .execute(|| {
                let c = counter_clone.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err("persistent error")
                }
            })
            .await;

        assert!(matches!(
            result,
            Err(RetryError::MaxRetriesExceeded { attempts: 3, .. })
        ));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_execute_until_polls_to_condition() {
        let policy = RetryPolicy::constant(5, Duration::from_millis(5));
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result: Result<u32, RetryError<&str>> = policy
            .execute_until(
                || {
                    let c = counter_clone.clone();
                    async move { Ok(c.fetch_add(1, Ordering::SeqCst)) }
                },
                |n| *n >= 3,
            )
            .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_execute_until_gives_up() {
        let policy = RetryPolicy::constant(2, Duration::from_millis(5));

        let result: Result<u32, RetryError<&str>> = policy
            .execute_until(|| async { Ok(0) }, |n| *n > 0)
            .await;

        assert!(matches!(result, Err(RetryError::ConditionNotMet { .. })));
    }
}

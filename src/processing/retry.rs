//! Retry logic and policies
//!
//! This module contains retry policies and strategies for rescheduling failed
//! jobs. The server applies them; workers only report success or failure.

use chrono::{DateTime, Duration, Utc};

/// Retry strategy for failed jobs
#[derive(Debug, Clone)]
pub enum RetryStrategy {
    /// No retry attempts
    None,
    /// Fixed interval between retries
    Fixed {
        /// Interval between retry attempts
        interval: Duration,
        /// Maximum number of retry attempts
        max_attempts: u32,
    },
    /// Linear backoff (delay increases by a fixed increment)
    LinearBackoff {
        /// Initial retry delay
        initial_delay: Duration,
        /// Amount to add to the delay for each retry
        increment: Duration,
        /// Maximum delay between retries
        max_delay: Duration,
        /// Maximum number of retry attempts
        max_attempts: u32,
    },
    /// Exponential backoff with optional jitter
    ExponentialBackoff {
        /// Initial retry delay
        initial_delay: Duration,
        /// Multiplier for each subsequent retry
        multiplier: f64,
        /// Maximum delay between retries
        max_delay: Duration,
        /// Maximum number of retry attempts
        max_attempts: u32,
        /// Add random jitter to delays (helps avoid thundering herd)
        jitter: bool,
    },
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::ExponentialBackoff {
            initial_delay: Duration::seconds(1),
            multiplier: 2.0,
            max_delay: Duration::minutes(15),
            max_attempts: 5,
            jitter: true,
        }
    }
}

impl RetryStrategy {
    /// Create a no-retry strategy
    pub fn none() -> Self {
        Self::None
    }

    /// Create a fixed interval retry strategy
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self::Fixed {
            interval,
            max_attempts,
        }
    }

    /// Create a linear backoff strategy
    pub fn linear_backoff(
        initial_delay: Duration,
        increment: Duration,
        max_delay: Duration,
        max_attempts: u32,
    ) -> Self {
        Self::LinearBackoff {
            initial_delay,
            increment,
            max_delay,
            max_attempts,
        }
    }

    /// Create an exponential backoff strategy
    pub fn exponential_backoff(
        initial_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
        max_attempts: u32,
    ) -> Self {
        Self::ExponentialBackoff {
            initial_delay,
            multiplier,
            max_delay,
            max_attempts,
            jitter: true,
        }
    }

    /// Calculate the delay before retry attempt `attempt` (1-based).
    ///
    /// `None` means the attempt is past the limit and the job must not be
    /// retried. Delays are non-decreasing in the attempt number: jitter is
    /// additive only, so a later attempt never waits less than an earlier one.
    pub fn calculate_delay(&self, attempt: u32) -> Option<Duration> {
        match self {
            RetryStrategy::None => None,
            RetryStrategy::Fixed {
                interval,
                max_attempts,
            } => {
                if attempt <= *max_attempts {
                    Some(*interval)
                } else {
                    None
                }
            }
            RetryStrategy::LinearBackoff {
                initial_delay,
                increment,
                max_delay,
                max_attempts,
            } => {
                if attempt > *max_attempts {
                    return None;
                }

                let delay = *initial_delay + *increment * (attempt as i32 - 1);
                Some(delay.min(*max_delay))
            }
            RetryStrategy::ExponentialBackoff {
                initial_delay,
                multiplier,
                max_delay,
                max_attempts,
                jitter,
            } => {
                if attempt > *max_attempts {
                    return None;
                }

                let mut delay = initial_delay.num_milliseconds() as f64;
                for _ in 1..attempt {
                    delay *= multiplier;
                }

                // Additive jitter only (up to +25%), so delays stay monotonic
                if *jitter {
                    delay += delay * 0.25 * fastrand::f64();
                }

                // Cap after jitter: saturated attempts all wait exactly
                // `max_delay` instead of a jittered value above it.
                delay = delay.min(max_delay.num_milliseconds() as f64);

                Some(Duration::milliseconds(delay as i64))
            }
        }
    }

    /// Get the maximum number of retry attempts
    pub fn max_attempts(&self) -> u32 {
        match self {
            RetryStrategy::None => 0,
            RetryStrategy::Fixed { max_attempts, .. }
            | RetryStrategy::LinearBackoff { max_attempts, .. }
            | RetryStrategy::ExponentialBackoff { max_attempts, .. } => *max_attempts,
        }
    }

    /// Check if retries are enabled
    pub fn is_retry_enabled(&self) -> bool {
        !matches!(self, RetryStrategy::None)
    }
}

/// Retry policy that decides when failed jobs get another attempt
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    /// Retry strategy to use
    pub strategy: RetryStrategy,
}

impl RetryPolicy {
    /// Create a new retry policy with the specified strategy
    pub fn new(strategy: RetryStrategy) -> Self {
        Self { strategy }
    }

    /// Create a no-retry policy
    pub fn no_retry() -> Self {
        Self {
            strategy: RetryStrategy::None,
        }
    }

    /// Check if retry attempt `attempt` (1-based) is allowed
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.strategy.is_retry_enabled() && attempt <= self.strategy.max_attempts()
    }

    /// Calculate the instant at which retry attempt `attempt` should run
    pub fn calculate_retry_time(&self, attempt: u32) -> Option<DateTime<Utc>> {
        self.strategy
            .calculate_delay(attempt)
            .map(|delay| Utc::now() + delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_retry_calculation() {
        let strategy = RetryStrategy::fixed(Duration::seconds(5), 2);

        assert_eq!(strategy.calculate_delay(1).unwrap().num_seconds(), 5);
        assert_eq!(strategy.calculate_delay(2).unwrap().num_seconds(), 5);

        // Third retry should return None
        assert!(strategy.calculate_delay(3).is_none());
    }

    #[test]
    fn test_linear_backoff_calculation() {
        let strategy = RetryStrategy::linear_backoff(
            Duration::seconds(1),
            Duration::seconds(2),
            Duration::minutes(1),
            3,
        );

        assert_eq!(strategy.calculate_delay(1).unwrap().num_seconds(), 1); // 1 + 2*(1-1)
        assert_eq!(strategy.calculate_delay(2).unwrap().num_seconds(), 3); // 1 + 2*(2-1)
        assert_eq!(strategy.calculate_delay(3).unwrap().num_seconds(), 5); // 1 + 2*(3-1)
        assert!(strategy.calculate_delay(4).is_none());
    }

    #[test]
    fn test_exponential_backoff_is_monotonic() {
        let strategy = RetryStrategy::ExponentialBackoff {
            initial_delay: Duration::seconds(1),
            multiplier: 2.0,
            max_delay: Duration::minutes(5),
            max_attempts: 4,
            jitter: true,
        };

        let mut previous = Duration::zero();
        for attempt in 1..=4 {
            let delay = strategy.calculate_delay(attempt).unwrap();
            assert!(
                delay >= previous,
                "delay for attempt {} decreased: {:?} < {:?}",
                attempt,
                delay,
                previous
            );
            previous = delay;
        }

        assert!(strategy.calculate_delay(5).is_none());
    }

    #[test]
    fn test_exponential_backoff_stays_monotonic_across_the_cap() {
        let strategy = RetryStrategy::ExponentialBackoff {
            initial_delay: Duration::seconds(10),
            multiplier: 10.0,
            max_delay: Duration::seconds(30),
            max_attempts: 4,
            jitter: true,
        };

        let mut previous = Duration::zero();
        for attempt in 1..=4 {
            let delay = strategy.calculate_delay(attempt).unwrap();
            assert!(
                delay >= previous,
                "delay for attempt {} decreased: {:?} < {:?}",
                attempt,
                delay,
                previous
            );
            previous = delay;
        }

        // From the second attempt on the cap dominates any jitter, so the
        // delay is exactly `max_delay`, never a jittered value above it.
        for attempt in 2..=4 {
            assert_eq!(strategy.calculate_delay(attempt).unwrap().num_seconds(), 30);
        }
    }

    #[test]
    fn test_exponential_backoff_caps_at_max_delay() {
        let strategy = RetryStrategy::ExponentialBackoff {
            initial_delay: Duration::seconds(10),
            multiplier: 10.0,
            max_delay: Duration::seconds(30),
            max_attempts: 5,
            jitter: false,
        };

        assert_eq!(strategy.calculate_delay(3).unwrap().num_seconds(), 30);
    }

    #[test]
    fn test_retry_policy_limits_attempts() {
        let policy = RetryPolicy::new(RetryStrategy::fixed(Duration::seconds(1), 3));

        assert!(policy.should_retry(1));
        assert!(policy.should_retry(3));
        assert!(!policy.should_retry(4));

        assert!(RetryPolicy::no_retry().calculate_retry_time(1).is_none());
        assert!(!RetryPolicy::no_retry().should_retry(1));
    }

    #[test]
    fn test_retry_time_is_in_the_future() {
        let policy = RetryPolicy::new(RetryStrategy::fixed(Duration::seconds(30), 1));
        let retry_at = policy.calculate_retry_time(1).unwrap();
        assert!(retry_at > Utc::now() + Duration::seconds(25));
    }
}

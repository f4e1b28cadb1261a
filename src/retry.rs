//! Retry policies with configurable backoff and jitter.
//!
//! A [`RetryPolicy`] describes how many times a request may be attempted and
//! how long to back off between attempts. The policy is pure math; the retry
//! loop itself lives in the executor, which also gates retries on
//! idempotency and error classification.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy for a task.
///
/// `max_attempts` includes the initial try: `Fixed { max_attempts: 3, .. }`
/// means one initial attempt plus up to two retries. A `max_attempts` of
/// zero is normalized to one.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// Single attempt, no retries.
    #[default]
    None,
    /// Constant delay between attempts.
    Fixed {
        /// Total attempts, including the initial try.
        max_attempts: u32,
        /// Delay before each retry.
        delay: Duration,
    },
    /// Exponentially growing delay, clamped to a maximum.
    Exponential {
        /// Total attempts, including the initial try.
        max_attempts: u32,
        /// Delay before the first retry.
        initial_delay: Duration,
        /// Factor applied per retry.
        multiplier: f64,
        /// Upper bound on any single delay.
        max_delay: Duration,
    },
}

impl RetryPolicy {
    /// Creates a fixed-delay policy.
    #[must_use]
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::Fixed {
            max_attempts,
            delay,
        }
    }

    /// Creates an exponential-backoff policy.
    #[must_use]
    pub fn exponential(
        max_attempts: u32,
        initial_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
    ) -> Self {
        Self::Exponential {
            max_attempts,
            initial_delay,
            multiplier,
            max_delay,
        }
    }

    /// Total attempts allowed, normalized to at least one.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::None => 1,
            Self::Fixed { max_attempts, .. } | Self::Exponential { max_attempts, .. } => {
                (*max_attempts).max(1)
            }
        }
    }

    /// Returns true if the policy permits any retry at all.
    #[must_use]
    pub fn allows_retry(&self) -> bool {
        self.max_attempts() > 1
    }

    /// Returns true if a retry may follow the given zero-indexed attempt.
    #[must_use]
    pub fn can_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts() - 1
    }

    /// The backoff delay after the given zero-indexed attempt.
    ///
    /// Zero when no retry may follow that attempt.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if !self.can_retry(attempt) {
            return Duration::ZERO;
        }

        match self {
            Self::None => Duration::ZERO,
            Self::Fixed { delay, .. } => *delay,
            Self::Exponential {
                initial_delay,
                multiplier,
                max_delay,
                ..
            } => {
                let raw = initial_delay.as_secs_f64() * multiplier.powi(attempt as i32);
                let clamped = raw.min(max_delay.as_secs_f64());
                Duration::from_secs_f64(clamped.max(0.0))
            }
        }
    }
}

/// Jitter applied to backoff delays to avoid thundering herds.
///
/// Applied at sleep time only; [`RetryPolicy::delay_for`] stays
/// deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JitterStrategy {
    /// No jitter.
    #[default]
    None,
    /// Random in `[0, delay]`.
    Full,
    /// Half fixed, half random: `[delay/2, delay]`.
    Equal,
}

impl JitterStrategy {
    /// Applies jitter to a computed delay.
    #[must_use]
    pub fn apply(&self, delay: Duration) -> Duration {
        let millis = delay.as_millis() as u64;
        if millis == 0 {
            return delay;
        }

        match self {
            Self::None => delay,
            Self::Full => Duration::from_millis(rand::thread_rng().gen_range(0..=millis)),
            Self::Equal => {
                let half = millis / 2;
                Duration::from_millis(half + rand::thread_rng().gen_range(0..=millis - half))
            }
        }
    }
}

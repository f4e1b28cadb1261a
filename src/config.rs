//! Task configuration consumed by the executor.
//!
//! A [`TaskConfig`] bundles the policies that shape one request's journey
//! through the pipeline: lifecycle binding, gate controls, caching, retry,
//! and deadlines. Configs are cheap to clone and immutable during execution.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cancellation::OwnerBinding;
use crate::retry::{JitterStrategy, RetryPolicy};

/// How a task's lifetime is bound.
#[derive(Debug, Clone, Default)]
pub enum Lifecycle {
    /// The task is cancelled when the owning object releases its handle.
    BoundToOwner(OwnerBinding),
    /// Ambient cancellation is ignored; only explicit cancellation (or the
    /// total timeout) stops the task.
    Persistent,
    /// The caller manages the task's lifetime.
    #[default]
    Manual,
}

/// Scheduling hint for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Priority {
    /// Background work.
    Low,
    /// Default priority.
    #[default]
    Normal,
    /// User-visible work.
    High,
    /// Must-run work (auth, teardown).
    Critical,
}

/// Gate controls: debounce, throttle, and deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ControlPolicy {
    /// Delay initiation until this long after the latest arrival per key.
    pub debounce: Option<Duration>,
    /// Minimum spacing between initiations per key.
    pub throttle: Option<Duration>,
    /// Attach concurrent equivalent requests to a single in-flight task.
    pub deduplicate: bool,
    /// Scheduling hint carried to higher layers.
    pub priority: Priority,
}

impl ControlPolicy {
    /// Creates a control policy with everything off.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the debounce window.
    #[must_use]
    pub fn with_debounce(mut self, window: Duration) -> Self {
        self.debounce = Some(window);
        self
    }

    /// Sets the throttle interval.
    #[must_use]
    pub fn with_throttle(mut self, interval: Duration) -> Self {
        self.throttle = Some(interval);
        self
    }

    /// Enables single-flight deduplication.
    #[must_use]
    pub fn deduplicated(mut self) -> Self {
        self.deduplicate = true;
        self
    }

    /// Sets the priority hint.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Cache behavior for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CachePolicy {
    /// Bypass the cache entirely.
    #[default]
    None,
    /// Return a fresh-enough cached response without hitting the network;
    /// write responses back with this TTL.
    CacheFirst {
        /// Maximum age for a hit to count as fresh.
        max_age: Duration,
    },
    /// Return any cached response immediately (fresh or stale) and refresh
    /// it in the background; cached entries never expire on their own.
    StaleWhileRevalidate,
}

/// Full configuration for one task.
#[derive(Debug, Clone, Default)]
pub struct TaskConfig {
    /// Lifetime binding.
    pub lifecycle: Lifecycle,
    /// Gate controls.
    pub control: ControlPolicy,
    /// Cache behavior.
    pub cache: CachePolicy,
    /// Retry behavior.
    pub retry: RetryPolicy,
    /// Jitter applied to retry backoff delays.
    pub jitter: JitterStrategy,
    /// Per-attempt deadline. Falls back to the request's own timeout when unset.
    pub timeout: Option<Duration>,
    /// Wall-clock deadline over all attempts.
    pub total_timeout: Option<Duration>,
}

impl TaskConfig {
    /// Creates a default config: manual lifecycle, no gating, no cache,
    /// no retries.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the lifecycle binding.
    #[must_use]
    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Sets the gate controls.
    #[must_use]
    pub fn with_control(mut self, control: ControlPolicy) -> Self {
        self.control = control;
        self
    }

    /// Sets the cache policy.
    #[must_use]
    pub fn with_cache(mut self, cache: CachePolicy) -> Self {
        self.cache = cache;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the backoff jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Sets the per-attempt deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the wall-clock deadline over all attempts.
    #[must_use]
    pub fn with_total_timeout(mut self, total: Duration) -> Self {
        self.total_timeout = Some(total);
        self
    }
}

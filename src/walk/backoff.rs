//! Retry spacing and retry budgets for the walker.
//!
//! A policy answers two questions for a zero-based attempt index: how long to
//! wait before the next read, and whether the budget is spent. Policies are
//! plain values with no internal state, so one instance can serve many walks.
//!
//! | Policy | `next(attempt)` |
//! |--------|-----------------|
//! | [`RetryBackoff`] | constant interval |
//! | [`ExponentialBackoff`] | `initial * 2^attempt`, capped |
//! | [`Jittered`] | inner policy plus uniform random jitter |
//! | [`NoRetry`] | never consulted, budget is zero |

use std::sync::Arc;
use std::time::Duration;

/// Retry spacing strategy.
pub trait Backoff: Send + Sync {
    /// Wait before the retry following `attempt`.
    fn next(&self, attempt: u32) -> Duration;

    /// True once `attempt` has reached the budget.
    fn exhausted(&self, attempt: u32) -> bool;
}

impl<B: Backoff + ?Sized> Backoff for Box<B> {
    fn next(&self, attempt: u32) -> Duration {
        (**self).next(attempt)
    }

    fn exhausted(&self, attempt: u32) -> bool {
        (**self).exhausted(attempt)
    }
}

impl<B: Backoff + ?Sized> Backoff for Arc<B> {
    fn next(&self, attempt: u32) -> Duration {
        (**self).next(attempt)
    }

    fn exhausted(&self, attempt: u32) -> bool {
        (**self).exhausted(attempt)
    }
}

/// Fixed interval between retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBackoff {
    interval: Duration,
    max_attempts: u32,
}

impl RetryBackoff {
    /// Waits `interval` between retries, at most `max_attempts` times.
    #[must_use]
    pub const fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

impl Backoff for RetryBackoff {
    fn next(&self, _attempt: u32) -> Duration {
        self.interval
    }

    fn exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

/// Doubling interval between retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    initial: Duration,
    max_interval: Duration,
    max_attempts: u32,
}

impl ExponentialBackoff {
    /// Starts at `initial` and doubles up to `max_interval`.
    #[must_use]
    pub const fn new(initial: Duration, max_interval: Duration, max_attempts: u32) -> Self {
        Self {
            initial,
            max_interval,
            max_attempts,
        }
    }
}

impl Backoff for ExponentialBackoff {
    fn next(&self, attempt: u32) -> Duration {
        self.initial
            .saturating_mul(1_u32 << attempt.min(20))
            .min(self.max_interval)
    }

    fn exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

/// Adds up to `max_jitter` of uniform random delay to another policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Jittered<B> {
    inner: B,
    max_jitter: Duration,
}

impl<B: Backoff> Jittered<B> {
    /// Wraps `inner` with jitter in `[0, max_jitter]`.
    #[must_use]
    pub const fn new(inner: B, max_jitter: Duration) -> Self {
        Self { inner, max_jitter }
    }
}

impl<B: Backoff> Backoff for Jittered<B> {
    fn next(&self, attempt: u32) -> Duration {
        let bound = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = if bound == 0 {
            0
        } else {
            rand::random_range(0..=bound)
        };
        self.inner
            .next(attempt)
            .saturating_add(Duration::from_millis(jitter))
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.inner.exhausted(attempt)
    }
}

/// Zero retry budget: a single read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NoRetry;

impl Backoff for NoRetry {
    fn next(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }

    fn exhausted(&self, _attempt: u32) -> bool {
        true
    }
}

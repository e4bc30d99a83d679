//! Overall deadlines for walks and convergence loops.
//!
//! A [`Deadline`] bounds both in-flight calls and the sleeps between them, so a
//! scenario's budget interrupts retries instead of waiting for the retry policy
//! to give up on its own.

use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Stand-in for "never" when a budget overflows the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// A fixed point in time after which work is abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    /// A deadline `budget` from now.
    #[must_use]
    pub fn after(budget: Duration) -> Self {
        let now = Instant::now();
        Self {
            at: now.checked_add(budget).unwrap_or(now + FAR_FUTURE),
            budget,
        }
    }

    /// Time left before expiry, zero once expired.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Whether the deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// The original budget.
    #[must_use]
    pub const fn budget(&self) -> Duration {
        self.budget
    }

    /// The error reported when `operation` is cut off by this deadline.
    pub fn expired(&self, operation: impl Into<String>) -> Error {
        Error::Timeout {
            operation: operation.into(),
            deadline: self.budget,
        }
    }

    /// Runs `future`, aborting it when the deadline passes.
    pub async fn run<T, F>(&self, operation: &str, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout_at(self.at, future)
            .await
            .map_err(|_| self.expired(operation))?
    }

    /// Runs `future` to completion, or returns `None` once the deadline passes.
    pub async fn within<F: Future>(&self, future: F) -> Option<F::Output> {
        tokio::time::timeout_at(self.at, future).await.ok()
    }

    /// Sleeps for `duration`, or fails as soon as the deadline passes.
    pub async fn sleep(&self, operation: &str, duration: Duration) -> Result<()> {
        match Instant::now().checked_add(duration) {
            Some(wake) if wake <= self.at => {
                tokio::time::sleep_until(wake).await;
                Ok(())
            },
            _ => {
                tokio::time::sleep_until(self.at).await;
                Err(self.expired(operation))
            },
        }
    }
}

/// Runs `future` under an optional deadline.
pub(crate) async fn run_within<T, F>(
    deadline: Option<&Deadline>,
    operation: &str,
    future: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match deadline {
        Some(deadline) => deadline.run(operation, future).await,
        None => future.await,
    }
}

/// Sleeps under an optional deadline.
pub(crate) async fn sleep_within(
    deadline: Option<&Deadline>,
    operation: &str,
    duration: Duration,
) -> Result<()> {
    match deadline {
        Some(deadline) => deadline.sleep(operation, duration).await,
        None => {
            tokio::time::sleep(duration).await;
            Ok(())
        },
    }
}

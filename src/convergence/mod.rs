//! `Eventually` and `Consistently` assertions over a polled producer.
//!
//! A producer is an async closure returning `Result<T>`. Its value is checked
//! against a [`Matcher`] on every poll. Only mismatches are retried: a producer
//! error ends the assertion immediately with that error, so a broken transport
//! is never mistaken for data that has not arrived yet.
//!
//! | Mode | Passes | Fails |
//! |------|--------|-------|
//! | [`Eventually`] | on the first match | no match before the timeout |
//! | [`Consistently`] | every poll for the whole duration matched | on the first mismatch |

mod matchers;

pub use matchers::{AtLeast, AtMost, Equal, Matcher, Satisfies, at_least, at_most, equal, satisfies};

use crate::deadline::Deadline;
use crate::{Error, Result};
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;

/// Poll interval used unless overridden.
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_millis(100);

fn record_polls(mode: &'static str, outcome: &'static str, polls: u64) {
    metrics::counter!(
        "convergence_polls_total",
        "mode" => mode,
        "outcome" => outcome
    )
    .increment(polls);
}

/// Polls until the produced value matches, or fails at the timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eventually {
    timeout: Duration,
    polling_interval: Duration,
}

impl Eventually {
    /// Gives up after `timeout`.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            polling_interval: DEFAULT_POLLING_INTERVAL,
        }
    }

    /// Sets the interval between polls.
    #[must_use]
    pub const fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    /// Polls `producer` until its value satisfies `matcher`.
    ///
    /// Returns the matching value. A producer call still in flight when the
    /// timeout passes is abandoned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConvergenceTimeout`] with the last observed value when
    /// nothing matched in time, or the producer's own error as soon as it
    /// fails.
    pub async fn should<T, P, Fut, M>(&self, mut producer: P, matcher: M) -> Result<T>
    where
        P: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Debug + Send,
        M: Matcher<T>,
    {
        let expectation = matcher.describe();
        let span = tracing::debug_span!(
            "convergence",
            mode = "eventually",
            expectation = %expectation,
            polls = tracing::field::Empty,
        );

        async {
            let deadline = Deadline::after(self.timeout);
            let mut last_observed: Option<String> = None;
            let mut polls: u64 = 0;

            loop {
                polls += 1;
                match deadline.within(producer()).await {
                    Some(Ok(value)) if matcher.matches(&value) => {
                        tracing::Span::current().record("polls", polls);
                        record_polls("eventually", "matched", polls);
                        return Ok(value);
                    },
                    Some(Ok(value)) => {
                        tracing::trace!(observed = ?value, "Not converged yet");
                        last_observed = Some(format!("{value:?}"));
                    },
                    Some(Err(err)) => {
                        record_polls("eventually", "error", polls);
                        return Err(err);
                    },
                    None => break,
                }

                let remaining = deadline.remaining();
                if remaining.is_zero() {
                    break;
                }
                tokio::time::sleep(self.polling_interval.min(remaining)).await;
                if deadline.is_expired() {
                    break;
                }
            }

            tracing::Span::current().record("polls", polls);
            record_polls("eventually", "timeout", polls);
            Err(Error::ConvergenceTimeout {
                timeout: self.timeout,
                expectation: expectation.clone(),
                last_observed: last_observed.unwrap_or_else(|| "<none>".to_string()),
            })
        }
        .instrument(span)
        .await
    }
}

/// Polls for a fixed duration, failing on the first mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Consistently {
    duration: Duration,
    polling_interval: Duration,
}

impl Consistently {
    /// Keeps checking for `duration`.
    #[must_use]
    pub const fn new(duration: Duration) -> Self {
        Self {
            duration,
            polling_interval: DEFAULT_POLLING_INTERVAL,
        }
    }

    /// Sets the interval between polls.
    #[must_use]
    pub const fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    /// Polls `producer` for the whole duration, requiring every value to
    /// satisfy `matcher`.
    ///
    /// The producer is always polled at least once. Returns the last value.
    /// A call still in flight when the duration ends is abandoned; the
    /// assertion then holds on the strength of the earlier polls.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConvergenceViolation`] at the first mismatch, the
    /// producer's own error as soon as it fails, or [`Error::Timeout`] when
    /// not a single call completed within the duration.
    pub async fn should<T, P, Fut, M>(&self, mut producer: P, matcher: M) -> Result<T>
    where
        P: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Debug + Send,
        M: Matcher<T>,
    {
        let expectation = matcher.describe();
        let span = tracing::debug_span!(
            "convergence",
            mode = "consistently",
            expectation = %expectation,
            polls = tracing::field::Empty,
        );

        async {
            let start = Instant::now();
            let deadline = Deadline::after(self.duration);
            let mut last: Option<T> = None;
            let mut polls: u64 = 0;

            loop {
                polls += 1;
                let value = match deadline.within(producer()).await {
                    Some(Ok(value)) => value,
                    Some(Err(err)) => {
                        record_polls("consistently", "error", polls);
                        return Err(err);
                    },
                    None => {
                        tracing::Span::current().record("polls", polls);
                        return match last {
                            Some(value) => {
                                record_polls("consistently", "held", polls);
                                Ok(value)
                            },
                            None => {
                                record_polls("consistently", "timeout", polls);
                                Err(deadline.expired("consistently"))
                            },
                        };
                    },
                };
                if !matcher.matches(&value) {
                    tracing::Span::current().record("polls", polls);
                    record_polls("consistently", "violated", polls);
                    return Err(Error::ConvergenceViolation {
                        elapsed: start.elapsed(),
                        expectation: expectation.clone(),
                        observed: format!("{value:?}"),
                    });
                }

                let remaining = deadline.remaining();
                if remaining.is_zero() {
                    tracing::Span::current().record("polls", polls);
                    record_polls("consistently", "held", polls);
                    return Ok(value);
                }
                last = Some(value);
                tokio::time::sleep(self.polling_interval.min(remaining)).await;
            }
        }
        .instrument(span)
        .await
    }
}

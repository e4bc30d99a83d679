//! # lcats
//!
//! Black-box acceptance harness for Log Cache, an eventually consistent store of
//! logs and metrics keyed by source id.
//!
//! The harness writes data through a log emitter, then checks from the outside
//! that the store makes it readable, countable and queryable within bounds.
//!
//! ## Building blocks
//!
//! - [`walk`]: paginated reads of one source id, tolerating empty pages with a
//!   pluggable [`walk::Backoff`] policy
//! - [`client`]: the read, meta and `PromQL` contracts, implemented over gRPC and
//!   over the OAuth2-authenticated HTTP gateway
//! - [`convergence`]: `Eventually` / `Consistently` polling assertions
//! - [`scenarios`]: the acceptance scenarios built on the above
//!
//! ## Example
//!
//! ```rust,ignore
//! use lcats::client::LogCacheClient;
//! use lcats::models::TimeWindow;
//! use lcats::walk::{RetryBackoff, WalkOptions, walk};
//!
//! let client = LogCacheClient::grpc(&config)?;
//! let window = TimeWindow::new(start, end)?;
//! let mut seen = 0;
//! let result = walk(
//!     &client,
//!     "my-source",
//!     |page| {
//!         seen += page.len();
//!         seen < 10_000
//!     },
//!     WalkOptions::new(window).with_backoff(RetryBackoff::new(interval, 100)),
//! )
//! .await?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use std::time::Duration;
use thiserror::Error as ThisError;

pub mod client;
pub mod config;
pub mod convergence;
pub mod deadline;
pub mod emitter;
pub mod models;
pub mod observability;
pub mod scenarios;
pub mod walk;

pub use client::{LogCacheClient, MetaReader, PageReader, QueryExecutor, ReadOptions};
pub use config::SuiteConfig;
pub use convergence::{Consistently, Eventually, Matcher};
pub use deadline::Deadline;
pub use models::{Envelope, EnvelopeType, MetaInfo, QueryResult, TimeWindow};
pub use walk::{Backoff, RetryBackoff, WalkOptions, WalkResult, WalkStop, walk};

/// Error type for harness operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `Transport` | Network, TLS, auth or protocol failure talking to the store or emitter |
/// | `Query` | The store rejects or cannot evaluate a `PromQL` query |
/// | `ConvergenceTimeout` | `Eventually` ran out of time without a match |
/// | `ConvergenceViolation` | `Consistently` observed a mismatch |
/// | `Timeout` | An overall deadline expired during a call or a wait |
/// | `InvalidInput` | Empty source id, inverted time window, bad scenario name |
/// | `Config` | Configuration file or environment cannot be loaded |
///
/// Running out of walk retries is deliberately absent: see [`WalkStop::BackoffExhausted`].
#[derive(Debug, ThisError)]
pub enum Error {
    /// Reaching the store or the emitter failed.
    ///
    /// Never retried by the walker or the convergence loops.
    #[error("transport error during '{operation}': {cause}")]
    Transport {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// The store rejected or failed to evaluate a query.
    #[error("query '{query}' failed: {cause}")]
    Query {
        /// The query string as sent.
        query: String,
        /// The store's explanation.
        cause: String,
    },

    /// An `Eventually` assertion did not match before its timeout.
    #[error(
        "expected {expectation} within {}, last observed {last_observed}",
        humantime::format_duration(*timeout)
    )]
    ConvergenceTimeout {
        /// How long the assertion polled.
        timeout: Duration,
        /// Description of the expected state.
        expectation: String,
        /// Debug rendering of the last value produced, or `<none>`.
        last_observed: String,
    },

    /// A `Consistently` assertion observed a mismatch.
    #[error(
        "expected {expectation} to hold, observed {observed} after {}",
        humantime::format_duration(*elapsed)
    )]
    ConvergenceViolation {
        /// Time since the assertion started.
        elapsed: Duration,
        /// Description of the expected state.
        expectation: String,
        /// Debug rendering of the offending value.
        observed: String,
    },

    /// An overall deadline expired.
    #[error("'{operation}' exceeded its deadline of {}", humantime::format_duration(*deadline))]
    Timeout {
        /// The operation that was interrupted.
        operation: String,
        /// The deadline budget that was exceeded.
        deadline: Duration,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration could not be loaded.
    #[error("configuration '{operation}' failed: {cause}")]
    Config {
        /// The configuration step that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

impl Error {
    /// Builds a transport error from any displayable cause.
    pub fn transport(operation: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::Transport {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }

    /// Returns true for failures of the store or the network, as opposed to
    /// assertion failures.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Timeout { .. })
    }
}

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("empty source id".to_string());
        assert_eq!(err.to_string(), "invalid input: empty source id");

        let err = Error::transport("read", "connection refused");
        assert_eq!(
            err.to_string(),
            "transport error during 'read': connection refused"
        );
        assert!(err.is_transport());

        let err = Error::ConvergenceTimeout {
            timeout: Duration::from_secs(60),
            expectation: "at least 9900".to_string(),
            last_observed: "4200".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "expected at least 9900 within 1m, last observed 4200"
        );
        assert!(!err.is_transport());
    }
}

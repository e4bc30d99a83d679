//! Store access contracts and their two transports.
//!
//! The walker, the convergence loops and the scenarios are written against
//! three traits:
//!
//! | Trait | Operation |
//! |-------|-----------|
//! | [`PageReader`] | one page of envelopes for a source id and time window |
//! | [`MetaReader`] | per-source counts and timestamps |
//! | [`QueryExecutor`] | `PromQL` instant and range queries |
//!
//! [`GrpcClient`] speaks the store's gRPC API with mutual TLS, [`HttpClient`]
//! speaks the HTTP gateway behind the OAuth2 auth proxy. [`LogCacheClient`]
//! picks one at construction time.
//!
//! None of the implementations retry. An empty page is a valid answer; every
//! failure is surfaced to the caller as [`Error::Transport`] or
//! [`Error::Query`].

mod grpc;
mod http;
mod oauth;
mod proto;

pub use grpc::GrpcClient;
pub use http::HttpClient;
pub use oauth::TokenSource;

use crate::config::SuiteConfig;
use crate::models::{Envelope, EnvelopeType, MetaInfo, QueryResult, TimeWindow};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Options for a single page read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Maximum envelopes per page; the store default applies when `None`.
    pub limit: Option<u32>,
    /// Only return these envelope kinds; empty means all.
    pub envelope_types: Vec<EnvelopeType>,
    /// Newest first instead of oldest first.
    pub descending: bool,
}

impl ReadOptions {
    /// Creates default read options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the page size limit.
    #[must_use]
    pub const fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Restricts the read to the given envelope kinds.
    #[must_use]
    pub fn with_envelope_types(mut self, types: impl IntoIterator<Item = EnvelopeType>) -> Self {
        self.envelope_types = types.into_iter().collect();
        self
    }

    /// Requests newest-first ordering.
    #[must_use]
    pub const fn with_descending(mut self, descending: bool) -> Self {
        self.descending = descending;
        self
    }
}

/// Reads one page of envelopes.
pub trait PageReader: Send + Sync {
    /// Fetches the envelopes visible for `source_id` within `window`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] for an empty source id, [`Error::Transport`]
    /// when the store cannot be reached or answers with a failure.
    fn read(
        &self,
        source_id: &str,
        window: TimeWindow,
        options: &ReadOptions,
    ) -> impl Future<Output = Result<Vec<Envelope>>> + Send;
}

/// Reads per-source bookkeeping.
pub trait MetaReader: Send + Sync {
    /// Fetches counts and timestamps for every source id the store holds.
    ///
    /// # Errors
    ///
    /// [`Error::Transport`] when the store cannot be reached.
    fn meta(&self) -> impl Future<Output = Result<HashMap<String, MetaInfo>>> + Send;
}

/// Executes `PromQL` queries.
pub trait QueryExecutor: Send + Sync {
    /// Evaluates `query` at `time`, or at the store's current time.
    ///
    /// # Errors
    ///
    /// [`Error::Query`] when the store rejects the query,
    /// [`Error::Transport`] when it cannot be reached.
    fn instant_query(
        &self,
        query: &str,
        time: Option<DateTime<Utc>>,
    ) -> impl Future<Output = Result<QueryResult>> + Send;

    /// Evaluates `query` over `window` every `step`.
    ///
    /// # Errors
    ///
    /// Same as [`QueryExecutor::instant_query`].
    fn range_query(
        &self,
        query: &str,
        window: TimeWindow,
        step: Duration,
    ) -> impl Future<Output = Result<QueryResult>> + Send;
}

/// Which wire protocol a client speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// gRPC with mutual TLS.
    Grpc,
    /// HTTP gateway with an OAuth2 bearer token.
    Http,
}

impl Transport {
    /// Both transports, gRPC first.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Grpc, Self::Http]
    }

    /// Returns the transport as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Grpc => "grpc",
            Self::Http => "http",
        }
    }

    /// Parses a transport name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "grpc" | "rpc" => Some(Self::Grpc),
            "http" | "https" => Some(Self::Http),
            _ => None,
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A store client over either transport.
pub enum LogCacheClient {
    /// gRPC transport.
    Grpc(GrpcClient),
    /// HTTP gateway transport.
    Http(HttpClient),
}

impl LogCacheClient {
    /// Builds a gRPC client from configuration.
    ///
    /// Must be called inside a tokio runtime; the channel connects lazily.
    ///
    /// # Errors
    ///
    /// Returns an error if the address or the TLS material is invalid.
    pub fn grpc(config: &SuiteConfig) -> Result<Self> {
        GrpcClient::new(config).map(Self::Grpc)
    }

    /// Builds an HTTP gateway client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn http(config: &SuiteConfig) -> Result<Self> {
        HttpClient::new(config).map(Self::Http)
    }

    /// Builds a client for `transport`.
    ///
    /// # Errors
    ///
    /// See [`LogCacheClient::grpc`] and [`LogCacheClient::http`].
    pub fn for_transport(transport: Transport, config: &SuiteConfig) -> Result<Self> {
        match transport {
            Transport::Grpc => Self::grpc(config),
            Transport::Http => Self::http(config),
        }
    }

    /// The transport this client speaks.
    #[must_use]
    pub const fn transport(&self) -> Transport {
        match self {
            Self::Grpc(_) => Transport::Grpc,
            Self::Http(_) => Transport::Http,
        }
    }
}

impl PageReader for LogCacheClient {
    async fn read(
        &self,
        source_id: &str,
        window: TimeWindow,
        options: &ReadOptions,
    ) -> Result<Vec<Envelope>> {
        match self {
            Self::Grpc(client) => client.read(source_id, window, options).await,
            Self::Http(client) => client.read(source_id, window, options).await,
        }
    }
}

impl MetaReader for LogCacheClient {
    async fn meta(&self) -> Result<HashMap<String, MetaInfo>> {
        match self {
            Self::Grpc(client) => client.meta().await,
            Self::Http(client) => client.meta().await,
        }
    }
}

impl QueryExecutor for LogCacheClient {
    async fn instant_query(&self, query: &str, time: Option<DateTime<Utc>>) -> Result<QueryResult> {
        match self {
            Self::Grpc(client) => client.instant_query(query, time).await,
            Self::Http(client) => client.instant_query(query, time).await,
        }
    }

    async fn range_query(
        &self,
        query: &str,
        window: TimeWindow,
        step: Duration,
    ) -> Result<QueryResult> {
        match self {
            Self::Grpc(client) => client.range_query(query, window, step).await,
            Self::Http(client) => client.range_query(query, window, step).await,
        }
    }
}

/// Rejects an empty source id before any request is made.
pub(crate) fn require_source_id(source_id: &str) -> Result<()> {
    if source_id.trim().is_empty() {
        return Err(Error::InvalidInput("source id must not be empty".to_string()));
    }
    Ok(())
}

/// Rejects an empty query or a zero step before any request is made.
pub(crate) fn require_query(query: &str, step: Option<Duration>) -> Result<()> {
    if query.trim().is_empty() {
        return Err(Error::InvalidInput("query must not be empty".to_string()));
    }
    if step.is_some_and(|step| step.is_zero()) {
        return Err(Error::InvalidInput(
            "range query step must be positive".to_string(),
        ));
    }
    Ok(())
}

/// Wraps one store request with a span, a request counter and a latency histogram.
pub(crate) async fn observed<T, F>(
    transport: Transport,
    operation: &'static str,
    request: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let span = tracing::debug_span!(
        "store.request",
        transport = transport.as_str(),
        operation = operation,
        status = tracing::field::Empty,
    );
    let start = Instant::now();
    let result = request.instrument(span.clone()).await;
    let status = match &result {
        Ok(_) => "success",
        Err(Error::Query { .. }) => "query_error",
        Err(Error::InvalidInput(_)) => "invalid_input",
        Err(_) => "error",
    };
    span.record("status", status);

    metrics::counter!(
        "store_requests_total",
        "transport" => transport.as_str(),
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "store_request_duration_ms",
        "transport" => transport.as_str(),
        "operation" => operation
    )
    .record(start.elapsed().as_secs_f64() * 1000.0);

    if let Err(err) = &result {
        tracing::debug!(
            transport = transport.as_str(),
            operation,
            error = %err,
            "store request failed"
        );
    }
    result
}

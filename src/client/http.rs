//! HTTP gateway transport.
//!
//! Talks to the store through the CF auth proxy. Every request carries a
//! bearer token from [`TokenSource`] when OAuth2 is configured. Read and meta
//! bodies are the gateway's protojson; query bodies are accepted either in the
//! Prometheus API shape or in protojson.

use super::oauth::TokenSource;
use super::{
    MetaReader, PageReader, QueryExecutor, ReadOptions, Transport, observed, require_query,
    require_source_id,
};
use crate::config::SuiteConfig;
use crate::models::{
    Envelope, EnvelopeType, Labels, MetaInfo, Point, QueryResult, Sample, Series, TimeWindow,
    parse_promql_time, promql_step, promql_time,
};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use reqwest::{StatusCode, Url};
use secrecy::ExposeSecret;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::time::Duration;

/// Longest error body quoted back in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Store client over the HTTP gateway.
pub struct HttpClient {
    http: reqwest::Client,
    base: Url,
    tokens: Option<TokenSource>,
}

impl HttpClient {
    /// Builds a client for `config.log_cache_http_url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the URL is invalid or the HTTP client
    /// cannot be constructed.
    pub fn new(config: &SuiteConfig) -> Result<Self> {
        let http = build_http_client(config)?;
        let base = Url::parse(&config.log_cache_http_url).map_err(|e| Error::Config {
            operation: "parse log cache http url".to_string(),
            cause: e.to_string(),
        })?;
        if base.cannot_be_a_base() {
            return Err(Error::Config {
                operation: "parse log cache http url".to_string(),
                cause: format!("'{base}' cannot be used as a base url"),
            });
        }
        let tokens = config
            .oauth
            .as_ref()
            .map(|oauth| TokenSource::new(http.clone(), oauth));

        tracing::debug!(
            url = %base,
            oauth = tokens.is_some(),
            skip_cert_verify = config.skip_cert_verify,
            "Created HTTP store client"
        );

        Ok(Self { http, base, tokens })
    }

    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.base.clone();
        // Checked non-cannot-be-a-base in `new`.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Issues an authorized GET and returns the status and the body text.
    async fn get(&self, operation: &'static str, url: Url) -> Result<(StatusCode, String)> {
        let mut request = self.http.get(url);
        if let Some(tokens) = &self.tokens {
            let token = tokens.token().await?;
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::transport(operation, e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::transport(operation, e))?;

        if status == StatusCode::UNAUTHORIZED
            && let Some(tokens) = &self.tokens
        {
            tokens.invalidate().await;
        }
        Ok((status, body))
    }

    /// GET that must succeed with a JSON body of type `T`.
    async fn get_json<T: DeserializeOwned>(&self, operation: &'static str, url: Url) -> Result<T> {
        let (status, body) = self.get(operation, url).await?;
        if !status.is_success() {
            return Err(Error::transport(
                operation,
                format!("HTTP {status}: {}", error_message(&body)),
            ));
        }
        serde_json::from_str(&body).map_err(|e| Error::transport(operation, e))
    }

    async fn query(&self, operation: &'static str, query: &str, url: Url) -> Result<QueryResult> {
        let (status, body) = self.get(operation, url).await?;
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY {
            return Err(Error::Query {
                query: query.to_string(),
                cause: error_message(&body),
            });
        }
        if !status.is_success() {
            return Err(Error::transport(
                operation,
                format!("HTTP {status}: {}", error_message(&body)),
            ));
        }
        parse_query_body(query, &body)
    }
}

/// Builds the shared reqwest client.
///
/// Certificate verification is disabled when `skip_cert_verify` is set; the
/// same client is used for the token endpoint.
fn build_http_client(config: &SuiteConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.default_timeout)
        .connect_timeout(config.default_timeout)
        .danger_accept_invalid_certs(config.skip_cert_verify)
        .user_agent(concat!("lcats/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| Error::Config {
            operation: "build http client".to_string(),
            cause: e.to_string(),
        })
}

impl PageReader for HttpClient {
    async fn read(
        &self,
        source_id: &str,
        window: TimeWindow,
        options: &ReadOptions,
    ) -> Result<Vec<Envelope>> {
        require_source_id(source_id)?;
        let mut url = self.endpoint(["api", "v1", "read", source_id]);
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("start_time", &window.start_nanos().to_string())
                .append_pair("end_time", &window.end_nanos().to_string());
            if let Some(limit) = options.limit {
                pairs.append_pair("limit", &limit.to_string());
            }
            for kind in &options.envelope_types {
                pairs.append_pair("envelope_types", kind.as_str());
            }
            if options.descending {
                pairs.append_pair("descending", "true");
            }
        }

        observed(Transport::Http, "read", async {
            let body: ReadBody = self.get_json("read", url).await?;
            Ok(body
                .envelopes
                .batch
                .into_iter()
                .map(WireEnvelope::into_envelope)
                .collect())
        })
        .await
    }
}

impl MetaReader for HttpClient {
    async fn meta(&self) -> Result<HashMap<String, MetaInfo>> {
        let url = self.endpoint(["api", "v1", "meta"]);
        observed(Transport::Http, "meta", async {
            let body: MetaBody = self.get_json("meta", url).await?;
            Ok(body
                .meta
                .into_iter()
                .map(|(source_id, info)| (source_id, info.into()))
                .collect())
        })
        .await
    }
}

impl QueryExecutor for HttpClient {
    async fn instant_query(&self, query: &str, time: Option<DateTime<Utc>>) -> Result<QueryResult> {
        require_query(query, None)?;
        let mut url = self.endpoint(["api", "v1", "query"]);
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("query", query);
            if let Some(time) = time {
                pairs.append_pair("time", &promql_time(time));
            }
        }
        observed(
            Transport::Http,
            "instant_query",
            self.query("instant_query", query, url),
        )
        .await
    }

    async fn range_query(
        &self,
        query: &str,
        window: TimeWindow,
        step: Duration,
    ) -> Result<QueryResult> {
        require_query(query, Some(step))?;
        let mut url = self.endpoint(["api", "v1", "query_range"]);
        url.query_pairs_mut()
            .append_pair("query", query)
            .append_pair("start", &promql_time(window.start()))
            .append_pair("end", &promql_time(window.end()))
            .append_pair("step", &promql_step(step));
        observed(
            Transport::Http,
            "range_query",
            self.query("range_query", query, url),
        )
        .await
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Deserialize, Default)]
struct ReadBody {
    #[serde(default)]
    envelopes: WireBatch,
}

#[derive(Deserialize, Default)]
struct WireBatch {
    #[serde(default)]
    batch: Vec<WireEnvelope>,
}

#[derive(Deserialize)]
struct WireEnvelope {
    #[serde(default, deserialize_with = "de_i64")]
    timestamp: i64,
    #[serde(default, alias = "sourceId")]
    source_id: String,
    #[serde(default, alias = "instanceId")]
    instance_id: String,
    #[serde(default)]
    tags: Labels,
    log: Option<IgnoredAny>,
    counter: Option<IgnoredAny>,
    gauge: Option<IgnoredAny>,
    timer: Option<IgnoredAny>,
    event: Option<IgnoredAny>,
}

impl WireEnvelope {
    fn into_envelope(self) -> Envelope {
        let kind = if self.log.is_some() {
            EnvelopeType::Log
        } else if self.counter.is_some() {
            EnvelopeType::Counter
        } else if self.gauge.is_some() {
            EnvelopeType::Gauge
        } else if self.timer.is_some() {
            EnvelopeType::Timer
        } else if self.event.is_some() {
            EnvelopeType::Event
        } else {
            EnvelopeType::Any
        };
        Envelope {
            timestamp: self.timestamp,
            source_id: self.source_id,
            instance_id: self.instance_id,
            tags: self.tags,
            kind,
        }
    }
}

#[derive(Deserialize, Default)]
struct MetaBody {
    #[serde(default)]
    meta: HashMap<String, WireMeta>,
}

#[derive(Deserialize)]
struct WireMeta {
    #[serde(default, deserialize_with = "de_i64")]
    count: i64,
    #[serde(default, deserialize_with = "de_i64")]
    expired: i64,
    #[serde(default, alias = "oldestTimestamp", deserialize_with = "de_i64")]
    oldest_timestamp: i64,
    #[serde(default, alias = "newestTimestamp", deserialize_with = "de_i64")]
    newest_timestamp: i64,
}

impl From<WireMeta> for MetaInfo {
    fn from(meta: WireMeta) -> Self {
        Self {
            count: meta.count,
            expired: meta.expired,
            oldest_timestamp: meta.oldest_timestamp,
            newest_timestamp: meta.newest_timestamp,
        }
    }
}

/// Prometheus API response envelope.
#[derive(Deserialize)]
struct PromBody {
    status: String,
    #[serde(default)]
    data: Option<PromData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
enum PromData {
    Scalar(PromValue),
    Vector(Vec<PromSample>),
    Matrix(Vec<PromSeries>),
}

/// `[unix_seconds, "value"]`
#[derive(Deserialize)]
struct PromValue(#[serde(deserialize_with = "de_f64")] f64, #[serde(deserialize_with = "de_f64")] f64);

impl From<PromValue> for Point {
    fn from(value: PromValue) -> Self {
        Self {
            time: value.0,
            value: value.1,
        }
    }
}

#[derive(Deserialize)]
struct PromSample {
    #[serde(default)]
    metric: Labels,
    value: PromValue,
}

#[derive(Deserialize)]
struct PromSeries {
    #[serde(default)]
    metric: Labels,
    #[serde(default)]
    values: Vec<PromValue>,
}

/// Gateway protojson query result.
#[derive(Deserialize, Default)]
struct GatewayResult {
    scalar: Option<GatewayPoint>,
    vector: Option<GatewayVector>,
    matrix: Option<GatewayMatrix>,
}

#[derive(Deserialize)]
struct GatewayPoint {
    #[serde(default)]
    time: String,
    #[serde(default, deserialize_with = "de_f64")]
    value: f64,
}

#[derive(Deserialize, Default)]
struct GatewayVector {
    #[serde(default)]
    samples: Vec<GatewaySample>,
}

#[derive(Deserialize)]
struct GatewaySample {
    #[serde(default)]
    metric: Labels,
    point: GatewayPoint,
}

#[derive(Deserialize, Default)]
struct GatewayMatrix {
    #[serde(default)]
    series: Vec<GatewaySeries>,
}

#[derive(Deserialize)]
struct GatewaySeries {
    #[serde(default)]
    metric: Labels,
    #[serde(default)]
    points: Vec<GatewayPoint>,
}

impl GatewayPoint {
    fn into_point(self) -> Result<Point> {
        let time = parse_promql_time(&self.time).ok_or_else(|| {
            Error::transport("decode point", format!("invalid timestamp {:?}", self.time))
        })?;
        Ok(Point {
            time,
            value: self.value,
        })
    }
}

impl GatewayResult {
    fn into_result(self) -> Result<QueryResult> {
        if let Some(scalar) = self.scalar {
            return scalar.into_point().map(QueryResult::Scalar);
        }
        if let Some(matrix) = self.matrix {
            let series = matrix
                .series
                .into_iter()
                .map(|series| {
                    let points = series
                        .points
                        .into_iter()
                        .map(GatewayPoint::into_point)
                        .collect::<Result<Vec<_>>>()?;
                    Ok(Series {
                        metric: series.metric,
                        points,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            return Ok(QueryResult::Matrix(series));
        }
        let samples = self
            .vector
            .unwrap_or_default()
            .samples
            .into_iter()
            .map(|sample| {
                Ok(Sample {
                    metric: sample.metric,
                    point: sample.point.into_point()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(QueryResult::Vector(samples))
    }
}

/// Decodes a successful query body in either supported shape.
fn parse_query_body(query: &str, body: &str) -> Result<QueryResult> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| Error::transport("decode query result", e))?;

    if value.get("status").is_none() {
        let gateway: GatewayResult = serde_json::from_value(value)
            .map_err(|e| Error::transport("decode query result", e))?;
        return gateway.into_result();
    }

    let prom: PromBody =
        serde_json::from_value(value).map_err(|e| Error::transport("decode query result", e))?;
    if prom.status != "success" {
        return Err(Error::Query {
            query: query.to_string(),
            cause: prom.error.unwrap_or(prom.status),
        });
    }
    Ok(match prom.data {
        Some(PromData::Scalar(value)) => QueryResult::Scalar(value.into()),
        Some(PromData::Vector(samples)) => QueryResult::Vector(
            samples
                .into_iter()
                .map(|sample| Sample {
                    metric: sample.metric,
                    point: sample.value.into(),
                })
                .collect(),
        ),
        Some(PromData::Matrix(series)) => QueryResult::Matrix(
            series
                .into_iter()
                .map(|series| Series {
                    metric: series.metric,
                    points: series.values.into_iter().map(Point::from).collect(),
                })
                .collect(),
        ),
        None => QueryResult::Vector(Vec::new()),
    })
}

/// Pulls a human-readable message out of an error body.
fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: String,
    }
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        return parsed.error;
    }
    let trimmed = body.trim();
    if trimmed.len() <= MAX_ERROR_BODY {
        return trimmed.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}

/// Protojson encodes 64-bit integers as strings.
fn de_i64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// Accepts `10`, `10.5`, `"10"` and `"NaN"`.
fn de_f64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

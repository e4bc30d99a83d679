//! Wire messages for the store's gRPC API.
//!
//! Declared by hand with `prost` derives instead of generated from `.proto`
//! files. Only the fields the harness reads or sends are declared; prost skips
//! unknown fields, so envelope payloads decode as empty markers.

#![allow(missing_docs, clippy::derive_partial_eq_without_eq)]

use crate::models::{self, EnvelopeType, Labels, QueryResult, parse_promql_time};
use crate::{Error, Result};
use std::collections::HashMap;

pub const EGRESS_READ: &str = "/logcache.v1.Egress/Read";
pub const EGRESS_META: &str = "/logcache.v1.Egress/Meta";
pub const PROMQL_INSTANT: &str = "/logcache.v1.PromQLQuerier/InstantQuery";
pub const PROMQL_RANGE: &str = "/logcache.v1.PromQLQuerier/RangeQuery";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadRequest {
    #[prost(string, tag = "1")]
    pub source_id: String,
    #[prost(int64, tag = "2")]
    pub start_time: i64,
    #[prost(int64, tag = "3")]
    pub end_time: i64,
    #[prost(int64, tag = "4")]
    pub limit: i64,
    #[prost(int32, repeated, tag = "5")]
    pub envelope_types: Vec<i32>,
    #[prost(bool, tag = "6")]
    pub descending: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadResponse {
    #[prost(message, optional, tag = "1")]
    pub envelopes: Option<EnvelopeBatch>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EnvelopeBatch {
    #[prost(message, repeated, tag = "1")]
    pub batch: Vec<Envelope>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Envelope {
    #[prost(int64, tag = "1")]
    pub timestamp: i64,
    #[prost(string, tag = "2")]
    pub source_id: String,
    #[prost(string, tag = "8")]
    pub instance_id: String,
    #[prost(map = "string, string", tag = "9")]
    pub tags: HashMap<String, String>,
    #[prost(oneof = "envelope::Message", tags = "4, 5, 6, 7, 10")]
    pub message: Option<envelope::Message>,
}

pub mod envelope {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Message {
        #[prost(message, tag = "4")]
        Log(super::Log),
        #[prost(message, tag = "5")]
        Counter(super::Counter),
        #[prost(message, tag = "6")]
        Gauge(super::Gauge),
        #[prost(message, tag = "7")]
        Timer(super::Timer),
        #[prost(message, tag = "10")]
        Event(super::Event),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Log {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Counter {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Gauge {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Timer {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Event {
    #[prost(string, tag = "1")]
    pub title: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MetaRequest {
    #[prost(bool, tag = "1")]
    pub local_only: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MetaResponse {
    #[prost(map = "string, message", tag = "1")]
    pub meta: HashMap<String, MetaInfo>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MetaInfo {
    #[prost(int64, tag = "1")]
    pub count: i64,
    #[prost(int64, tag = "2")]
    pub expired: i64,
    #[prost(int64, tag = "3")]
    pub oldest_timestamp: i64,
    #[prost(int64, tag = "4")]
    pub newest_timestamp: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InstantQueryRequest {
    #[prost(string, tag = "1")]
    pub query: String,
    #[prost(string, tag = "2")]
    pub time: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RangeQueryRequest {
    #[prost(string, tag = "1")]
    pub query: String,
    #[prost(string, tag = "2")]
    pub start: String,
    #[prost(string, tag = "3")]
    pub end: String,
    #[prost(string, tag = "4")]
    pub step: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InstantQueryResult {
    #[prost(oneof = "instant_query_result::Result", tags = "1, 2, 3")]
    pub result: Option<instant_query_result::Result>,
}

pub mod instant_query_result {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Result {
        #[prost(message, tag = "1")]
        Scalar(super::Scalar),
        #[prost(message, tag = "2")]
        Vector(super::Vector),
        #[prost(message, tag = "3")]
        Matrix(super::Matrix),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RangeQueryResult {
    #[prost(oneof = "range_query_result::Result", tags = "1")]
    pub result: Option<range_query_result::Result>,
}

pub mod range_query_result {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Result {
        #[prost(message, tag = "1")]
        Matrix(super::Matrix),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Scalar {
    #[prost(string, tag = "1")]
    pub time: String,
    #[prost(double, tag = "2")]
    pub value: f64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Point {
    #[prost(string, tag = "1")]
    pub time: String,
    #[prost(double, tag = "2")]
    pub value: f64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Sample {
    #[prost(map = "string, string", tag = "1")]
    pub metric: HashMap<String, String>,
    #[prost(message, optional, tag = "2")]
    pub point: Option<Point>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Vector {
    #[prost(message, repeated, tag = "1")]
    pub samples: Vec<Sample>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Series {
    #[prost(map = "string, string", tag = "1")]
    pub metric: HashMap<String, String>,
    #[prost(message, repeated, tag = "2")]
    pub points: Vec<Point>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Matrix {
    #[prost(message, repeated, tag = "1")]
    pub series: Vec<Series>,
}

impl From<Envelope> for models::Envelope {
    fn from(envelope: Envelope) -> Self {
        let kind = match envelope.message {
            Some(envelope::Message::Log(_)) => EnvelopeType::Log,
            Some(envelope::Message::Counter(_)) => EnvelopeType::Counter,
            Some(envelope::Message::Gauge(_)) => EnvelopeType::Gauge,
            Some(envelope::Message::Timer(_)) => EnvelopeType::Timer,
            Some(envelope::Message::Event(_)) => EnvelopeType::Event,
            None => EnvelopeType::Any,
        };
        Self {
            timestamp: envelope.timestamp,
            source_id: envelope.source_id,
            instance_id: envelope.instance_id,
            tags: envelope.tags.into_iter().collect(),
            kind,
        }
    }
}

impl From<MetaInfo> for models::MetaInfo {
    fn from(info: MetaInfo) -> Self {
        Self {
            count: info.count,
            expired: info.expired,
            oldest_timestamp: info.oldest_timestamp,
            newest_timestamp: info.newest_timestamp,
        }
    }
}

fn point(time: &str, value: f64) -> Result<models::Point> {
    let time = parse_promql_time(time)
        .ok_or_else(|| Error::transport("decode point", format!("invalid timestamp {time:?}")))?;
    Ok(models::Point { time, value })
}

fn labels(metric: HashMap<String, String>) -> Labels {
    metric.into_iter().collect()
}

fn samples(vector: Vector) -> Result<Vec<models::Sample>> {
    vector
        .samples
        .into_iter()
        .map(|sample| {
            let raw = sample.point.unwrap_or_default();
            Ok(models::Sample {
                metric: labels(sample.metric),
                point: point(&raw.time, raw.value)?,
            })
        })
        .collect()
}

fn series(matrix: Matrix) -> Result<Vec<models::Series>> {
    matrix
        .series
        .into_iter()
        .map(|series| {
            let points = series
                .points
                .iter()
                .map(|p| point(&p.time, p.value))
                .collect::<Result<Vec<_>>>()?;
            Ok(models::Series {
                metric: labels(series.metric),
                points,
            })
        })
        .collect()
}

impl InstantQueryResult {
    /// Converts into the domain result tree.
    ///
    /// A response without a result is decoded as an empty vector.
    pub fn into_result(self) -> Result<QueryResult> {
        match self.result {
            Some(instant_query_result::Result::Scalar(scalar)) => {
                Ok(QueryResult::Scalar(point(&scalar.time, scalar.value)?))
            },
            Some(instant_query_result::Result::Vector(vector)) => {
                samples(vector).map(QueryResult::Vector)
            },
            Some(instant_query_result::Result::Matrix(matrix)) => {
                series(matrix).map(QueryResult::Matrix)
            },
            None => Ok(QueryResult::Vector(Vec::new())),
        }
    }
}

impl RangeQueryResult {
    /// Converts into the domain result tree.
    pub fn into_result(self) -> Result<QueryResult> {
        match self.result {
            Some(range_query_result::Result::Matrix(matrix)) => {
                series(matrix).map(QueryResult::Matrix)
            },
            None => Ok(QueryResult::Matrix(Vec::new())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_read_response_decodes_envelope_kind_and_tags() {
        let response = ReadResponse {
            envelopes: Some(EnvelopeBatch {
                batch: vec![Envelope {
                    timestamp: 42,
                    source_id: "app".to_string(),
                    instance_id: "0".to_string(),
                    tags: HashMap::from([("deployment".to_string(), "cf".to_string())]),
                    message: Some(envelope::Message::Gauge(Gauge {})),
                }],
            }),
        };
        let bytes = response.encode_to_vec();
        let decoded = ReadResponse::decode(bytes.as_slice()).unwrap();

        let envelopes: Vec<models::Envelope> = decoded
            .envelopes
            .unwrap_or_default()
            .batch
            .into_iter()
            .map(Into::into)
            .collect();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].kind, EnvelopeType::Gauge);
        assert_eq!(envelopes[0].timestamp, 42);
        assert_eq!(envelopes[0].tags.get("deployment").map(String::as_str), Some("cf"));
    }

    #[test]
    fn test_instant_vector_converts() {
        let result = InstantQueryResult {
            result: Some(instant_query_result::Result::Vector(Vector {
                samples: vec![Sample {
                    metric: HashMap::new(),
                    point: Some(Point {
                        time: "1700000000.000".to_string(),
                        value: 10.0,
                    }),
                }],
            })),
        };
        let converted = result.into_result().unwrap();
        assert_eq!(converted.sample_values(), vec![10.0]);
    }

    #[test]
    fn test_bad_point_time_is_a_transport_error() {
        let result = RangeQueryResult {
            result: Some(range_query_result::Result::Matrix(Matrix {
                series: vec![Series {
                    metric: HashMap::new(),
                    points: vec![Point {
                        time: "noon".to_string(),
                        value: 1.0,
                    }],
                }],
            })),
        };
        assert!(result.into_result().unwrap_err().is_transport());
    }

    #[test]
    fn test_missing_result_is_empty() {
        let result = InstantQueryResult { result: None }.into_result().unwrap();
        assert!(result.sample_values().is_empty());
    }
}

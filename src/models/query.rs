//! `PromQL` query results.

use chrono::DateTime;
use std::collections::BTreeMap;

/// Label set identifying a series.
pub type Labels = BTreeMap<String, String>;

/// A single timestamped value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    /// Unix seconds, fractional.
    pub time: f64,
    /// Sample value.
    pub value: f64,
}

/// One series in an instant vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Series labels.
    pub metric: Labels,
    /// The series' single value at evaluation time.
    pub point: Point,
}

/// One series in a range matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    /// Series labels.
    pub metric: Labels,
    /// Points in ascending time order.
    pub points: Vec<Point>,
}

/// Result tree of an instant or range query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    /// A scalar expression result.
    Scalar(Point),
    /// One sample per output series.
    Vector(Vec<Sample>),
    /// A sequence of points per output series.
    Matrix(Vec<Series>),
}

impl QueryResult {
    /// Result type name as reported by the store.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::Vector(_) => "vector",
            Self::Matrix(_) => "matrix",
        }
    }

    /// The samples of a vector result.
    #[must_use]
    pub fn as_vector(&self) -> Option<&[Sample]> {
        match self {
            Self::Vector(samples) => Some(samples),
            _ => None,
        }
    }

    /// The series of a matrix result.
    #[must_use]
    pub fn as_matrix(&self) -> Option<&[Series]> {
        match self {
            Self::Matrix(series) => Some(series),
            _ => None,
        }
    }

    /// Values of a vector result in series order; empty for other kinds.
    #[must_use]
    pub fn sample_values(&self) -> Vec<f64> {
        self.as_vector()
            .map(|samples| samples.iter().map(|s| s.point.value).collect())
            .unwrap_or_default()
    }

    /// Points of the first series of a matrix result; empty when absent.
    #[must_use]
    pub fn first_series_points(&self) -> &[Point] {
        self.as_matrix()
            .and_then(|series| series.first())
            .map(|series| series.points.as_slice())
            .unwrap_or_default()
    }
}

/// Parses a `PromQL` timestamp: decimal Unix seconds or RFC 3339.
#[must_use]
pub fn parse_promql_time(raw: &str) -> Option<f64> {
    if let Ok(seconds) = raw.parse::<f64>() {
        return Some(seconds);
    }
    let parsed = DateTime::parse_from_rfc3339(raw).ok()?;
    #[allow(clippy::cast_precision_loss)]
    let seconds = parsed.timestamp() as f64 + f64::from(parsed.timestamp_subsec_millis()) / 1000.0;
    Some(seconds)
}

//! Data models shared by the transports, the walker and the scenarios.

mod envelope;
mod meta;
mod query;
mod window;

pub use envelope::{Envelope, EnvelopeType};
pub use meta::MetaInfo;
pub use query::{Labels, Point, QueryResult, Sample, Series, parse_promql_time};
pub use window::{TimeWindow, promql_step, promql_time};

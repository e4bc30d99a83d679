//! Envelope records and envelope types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Envelope categories the store can filter reads by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeType {
    /// No filter / unknown kind.
    #[default]
    Any,
    /// Application log line.
    Log,
    /// Monotonic counter.
    Counter,
    /// Gauge with one or more named values.
    Gauge,
    /// Start/stop timer.
    Timer,
    /// Title/body event.
    Event,
}

impl EnvelopeType {
    /// Returns the wire name used by the HTTP gateway.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Any => "ANY",
            Self::Log => "LOG",
            Self::Counter => "COUNTER",
            Self::Gauge => "GAUGE",
            Self::Timer => "TIMER",
            Self::Event => "EVENT",
        }
    }

    /// Returns the protobuf enum value.
    #[must_use]
    pub const fn as_i32(&self) -> i32 {
        match self {
            Self::Any => 0,
            Self::Log => 1,
            Self::Counter => 2,
            Self::Gauge => 3,
            Self::Timer => 4,
            Self::Event => 5,
        }
    }

    /// Parses an envelope type from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "any" => Some(Self::Any),
            "log" | "logs" => Some(Self::Log),
            "counter" => Some(Self::Counter),
            "gauge" => Some(Self::Gauge),
            "timer" => Some(Self::Timer),
            "event" => Some(Self::Event),
            _ => None,
        }
    }
}

impl fmt::Display for EnvelopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One record read back from the store.
///
/// The harness never looks at payloads. It counts envelopes and uses the
/// timestamp to move the read cursor forward.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Envelope {
    /// Nanoseconds since the Unix epoch.
    pub timestamp: i64,
    /// Source id the envelope was written under.
    pub source_id: String,
    /// Emitting instance, often empty.
    pub instance_id: String,
    /// Envelope tags.
    pub tags: BTreeMap<String, String>,
    /// Which payload the envelope carried.
    pub kind: EnvelopeType,
}

impl Envelope {
    /// Creates an envelope with only a source id and timestamp.
    #[must_use]
    pub fn new(source_id: impl Into<String>, timestamp: i64) -> Self {
        Self {
            timestamp,
            source_id: source_id.into(),
            ..Self::default()
        }
    }

    /// Sets the envelope kind.
    #[must_use]
    pub const fn with_kind(mut self, kind: EnvelopeType) -> Self {
        self.kind = kind;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_type_roundtrip() {
        for kind in [
            EnvelopeType::Any,
            EnvelopeType::Log,
            EnvelopeType::Counter,
            EnvelopeType::Gauge,
            EnvelopeType::Timer,
            EnvelopeType::Event,
        ] {
            assert_eq!(EnvelopeType::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EnvelopeType::parse("logs"), Some(EnvelopeType::Log));
        assert_eq!(EnvelopeType::parse("histogram"), None);
    }

    #[test]
    fn test_proto_values_are_stable() {
        assert_eq!(EnvelopeType::Any.as_i32(), 0);
        assert_eq!(EnvelopeType::Gauge.as_i32(), 3);
        assert_eq!(EnvelopeType::Event.as_i32(), 5);
    }
}

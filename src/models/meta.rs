//! Per-source bookkeeping reported by the store.

/// Counters the store keeps for one source id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetaInfo {
    /// Envelopes currently held.
    pub count: i64,
    /// Envelopes pruned so far.
    pub expired: i64,
    /// Oldest held timestamp, nanoseconds.
    pub oldest_timestamp: i64,
    /// Newest held timestamp, nanoseconds.
    pub newest_timestamp: i64,
}

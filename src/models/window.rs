//! Time windows bounding reads and range queries.

use crate::{Error, Result};
use chrono::{DateTime, TimeDelta, Utc};
use std::fmt;
use std::time::Duration;

/// A `[start, end]` pair of instants with `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    /// Creates a window, rejecting `start > end`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when the window is inverted.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidInput(format!(
                "time window start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// The window covering the last `duration` up to now.
    #[must_use]
    pub fn last(duration: Duration) -> Self {
        let end = Utc::now();
        let start = end
            .checked_sub_signed(to_delta(duration))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self { start, end }
    }

    /// Window start.
    #[must_use]
    pub const fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Window end.
    #[must_use]
    pub const fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Window start in nanoseconds since the epoch, saturating.
    #[must_use]
    pub fn start_nanos(&self) -> i64 {
        to_nanos(self.start)
    }

    /// Window end in nanoseconds since the epoch, saturating.
    #[must_use]
    pub fn end_nanos(&self) -> i64 {
        to_nanos(self.end)
    }

    /// Length of the window.
    #[must_use]
    pub fn duration(&self) -> Duration {
        (self.end - self.start).to_std().unwrap_or(Duration::ZERO)
    }

    /// Returns the remainder of the window strictly after `timestamp_nanos`.
    ///
    /// `None` once the remainder would be empty.
    #[must_use]
    pub fn after(&self, timestamp_nanos: i64) -> Option<Self> {
        let next = timestamp_nanos.checked_add(1)?;
        let start = DateTime::from_timestamp_nanos(next).max(self.start);
        (start <= self.end).then_some(Self {
            start,
            end: self.end,
        })
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Formats an instant the way `PromQL` endpoints expect: decimal Unix seconds.
#[must_use]
pub fn promql_time(at: DateTime<Utc>) -> String {
    format!("{}.{:03}", at.timestamp(), at.timestamp_subsec_millis())
}

/// Formats a step duration as whole seconds or milliseconds (`5s`, `250ms`).
#[must_use]
pub fn promql_step(step: Duration) -> String {
    if step.subsec_millis() == 0 {
        format!("{}s", step.as_secs())
    } else {
        format!("{}ms", step.as_millis())
    }
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

fn to_nanos(at: DateTime<Utc>) -> i64 {
    at.timestamp_nanos_opt().unwrap_or(if at.timestamp() < 0 {
        i64::MIN
    } else {
        i64::MAX
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(nanos: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(nanos)
    }

    #[test]
    fn test_inverted_window_rejected() {
        let err = TimeWindow::new(at(10), at(5)).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(TimeWindow::new(at(5), at(5)).is_ok());
    }

    #[test]
    fn test_after_advances_past_timestamp() {
        let window = TimeWindow::new(at(100), at(200)).unwrap();

        let rest = window.after(150).unwrap();
        assert_eq!(rest.start_nanos(), 151);
        assert_eq!(rest.end_nanos(), 200);

        // A timestamp before the window never moves the start backwards.
        assert_eq!(window.after(10).unwrap().start_nanos(), 100);

        assert_eq!(window.after(199).unwrap().start_nanos(), 200);
        assert!(window.after(200).is_none());
        assert!(window.after(i64::MAX).is_none());
    }

    #[test]
    fn test_last_spans_requested_duration() {
        let window = TimeWindow::last(Duration::from_secs(60));
        assert_eq!(window.duration(), Duration::from_secs(60));
    }

    #[test]
    fn test_promql_formatting() {
        let instant = DateTime::from_timestamp_millis(1_700_000_000_250).unwrap();
        assert_eq!(promql_time(instant), "1700000000.250");
        assert_eq!(promql_step(Duration::from_secs(5)), "5s");
        assert_eq!(promql_step(Duration::from_millis(1500)), "1500ms");
    }
}

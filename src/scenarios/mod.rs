//! Acceptance scenarios.
//!
//! Every scenario writes through the emitter under fresh source ids, then
//! asserts from the outside that the store converges on the expected state.
//!
//! | Scenario | Emits | Asserts |
//! |----------|-------|---------|
//! | `logs-available` | logs | a walk eventually counts at least 99% of the envelopes |
//! | `meta-lists-source` | logs | meta eventually reports at least 99% of the envelopes |
//! | `instant-query` | gauges | `metric{source_id=..}` is eventually `[10]` |
//! | `instant-query-math` | gauges, two sources | `a + ignoring(source_id) b` is eventually `[20]` |
//! | `instant-aggregation` | gauges | `sum_over_time(..[5m])` eventually equals the total, then keeps it |
//! | `range-aggregation` | gauges | the points of a range `sum_over_time` eventually add up to the total |

use crate::client::{MetaReader, PageReader, QueryExecutor, Transport};
use crate::config::SuiteConfig;
use crate::convergence::{Consistently, Eventually, at_least, equal};
use crate::emitter::LogEmitter;
use crate::models::TimeWindow;
use crate::walk::{RetryBackoff, WalkOptions, walk};
use crate::{Error, Result};
use chrono::{DateTime, TimeDelta, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Value of every gauge the emitter writes.
pub const GAUGE_VALUE: f64 = 10.0;

/// Retry spacing while counting envelopes.
const WALK_INTERVAL: Duration = Duration::from_millis(50);

/// Retry budget while counting envelopes.
const WALK_MAX_RETRIES: u32 = 100;

/// How far past "now" a counting walk reaches.
const WALK_LOOKAHEAD: Duration = Duration::from_secs(5);

/// Step, and lookback, of the range aggregation.
const RANGE_STEP: Duration = Duration::from_secs(5);

/// Lookback of the instant aggregation.
const INSTANT_LOOKBACK: &str = "5m";

/// One acceptance scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scenario {
    /// Emitted logs become readable.
    LogsAvailable,
    /// Meta reports the emitted count.
    MetaListsSource,
    /// An instant selector returns the gauge value.
    InstantQuery,
    /// Binary arithmetic across two sources.
    InstantQueryMath,
    /// Instant `sum_over_time` converges and stays put.
    InstantAggregation,
    /// Range `sum_over_time` converges.
    RangeAggregation,
}

impl Scenario {
    /// Every scenario, in catalogue order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::LogsAvailable,
            Self::MetaListsSource,
            Self::InstantQuery,
            Self::InstantQueryMath,
            Self::InstantAggregation,
            Self::RangeAggregation,
        ]
    }

    /// Returns the scenario name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LogsAvailable => "logs-available",
            Self::MetaListsSource => "meta-lists-source",
            Self::InstantQuery => "instant-query",
            Self::InstantQueryMath => "instant-query-math",
            Self::InstantAggregation => "instant-aggregation",
            Self::RangeAggregation => "range-aggregation",
        }
    }

    /// One-line description for listings.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::LogsAvailable => "emitted logs can be walked back out of the store",
            Self::MetaListsSource => "meta reports the number of emitted logs",
            Self::InstantQuery => "an instant selector returns the emitted gauge value",
            Self::InstantQueryMath => "gauges of two sources add up ignoring source_id",
            Self::InstantAggregation => "sum_over_time converges on the emitted total and holds",
            Self::RangeAggregation => "range sum_over_time points add up to the emitted total",
        }
    }

    /// Parses a scenario name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an unknown name.
    pub fn parse(s: &str) -> Result<Self> {
        let name = s.trim().to_lowercase().replace('_', "-");
        Self::all()
            .iter()
            .copied()
            .find(|scenario| scenario.as_str() == name)
            .ok_or_else(|| Error::InvalidInput(format!("unknown scenario '{s}'")))
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of one scenario run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioReport {
    /// Which scenario ran.
    pub scenario: Scenario,
    /// Over which transport.
    pub transport: Transport,
    /// Wall-clock duration.
    pub elapsed: Duration,
    /// Why it failed, `None` when it passed.
    pub failure: Option<String>,
}

impl ScenarioReport {
    /// Whether the scenario passed.
    #[must_use]
    pub const fn passed(&self) -> bool {
        self.failure.is_none()
    }
}

/// A fresh source id; no two scenarios share one.
#[must_use]
pub fn fresh_source_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Sum of `count` gauges of [`GAUGE_VALUE`].
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn expected_gauge_total(count: u64) -> f64 {
    count as f64 * GAUGE_VALUE
}

/// 99% of `expected`, rounded down.
#[must_use]
pub const fn ninety_nine_percent(expected: u64) -> u64 {
    expected / 100 * 99 + expected % 100 * 99 / 100
}

/// Runs scenarios against one store client.
pub struct Harness<C> {
    config: Arc<SuiteConfig>,
    client: Arc<C>,
    emitter: Arc<LogEmitter>,
    transport: Transport,
}

impl<C> Clone for Harness<C> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            client: Arc::clone(&self.client),
            emitter: Arc::clone(&self.emitter),
            transport: self.transport,
        }
    }
}

impl<C> Harness<C>
where
    C: PageReader + MetaReader + QueryExecutor + 'static,
{
    /// Creates a harness; `transport` labels reports and metrics.
    pub fn new(
        config: Arc<SuiteConfig>,
        client: C,
        transport: Transport,
        emitter: LogEmitter,
    ) -> Self {
        Self {
            config,
            client: Arc::new(client),
            emitter: Arc::new(emitter),
            transport,
        }
    }

    /// The client scenarios run against.
    #[must_use]
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Runs one scenario and reports the outcome.
    pub async fn run(&self, scenario: Scenario) -> ScenarioReport {
        let span = tracing::info_span!(
            "scenario",
            scenario = scenario.as_str(),
            transport = self.transport.as_str(),
        );
        let start = Instant::now();
        let result = self.execute(scenario).instrument(span.clone()).await;
        let elapsed = start.elapsed();

        let outcome = if result.is_ok() { "passed" } else { "failed" };
        metrics::counter!(
            "scenario_runs_total",
            "scenario" => scenario.as_str(),
            "transport" => self.transport.as_str(),
            "outcome" => outcome
        )
        .increment(1);

        match &result {
            Ok(()) => tracing::info!(
                parent: &span,
                elapsed_ms = elapsed.as_millis(),
                "Scenario passed"
            ),
            Err(err) => tracing::warn!(
                parent: &span,
                elapsed_ms = elapsed.as_millis(),
                error = %err,
                "Scenario failed"
            ),
        }

        ScenarioReport {
            scenario,
            transport: self.transport,
            elapsed,
            failure: result.err().map(|e| e.to_string()),
        }
    }

    /// Runs `scenarios`, concurrently when `parallel` is set.
    ///
    /// Reports come back in the order of `scenarios` either way.
    pub async fn run_all(&self, scenarios: &[Scenario], parallel: bool) -> Vec<ScenarioReport> {
        if !parallel {
            let mut reports = Vec::with_capacity(scenarios.len());
            for &scenario in scenarios {
                reports.push(self.run(scenario).await);
            }
            return reports;
        }

        let handles: Vec<_> = scenarios
            .iter()
            .map(|&scenario| {
                let harness = self.clone();
                (
                    scenario,
                    tokio::spawn(async move { harness.run(scenario).await }),
                )
            })
            .collect();

        let mut reports = Vec::with_capacity(handles.len());
        for (scenario, handle) in handles {
            let report = handle.await.unwrap_or_else(|e| ScenarioReport {
                scenario,
                transport: self.transport,
                elapsed: Duration::ZERO,
                failure: Some(format!("scenario task failed: {e}")),
            });
            reports.push(report);
        }
        reports
    }

    async fn execute(&self, scenario: Scenario) -> Result<()> {
        match scenario {
            Scenario::LogsAvailable => self.logs_available().await,
            Scenario::MetaListsSource => self.meta_lists_source().await,
            Scenario::InstantQuery => self.instant_query().await,
            Scenario::InstantQueryMath => self.instant_query_math().await,
            Scenario::InstantAggregation => self.instant_aggregation().await,
            Scenario::RangeAggregation => self.range_aggregation().await,
        }
    }

    fn eventually(&self) -> Eventually {
        Eventually::new(self.config.eventually_timeout)
            .with_polling_interval(self.config.polling_interval)
    }

    fn consistently(&self) -> Consistently {
        Consistently::new(self.config.consistently_duration)
            .with_polling_interval(self.config.polling_interval)
    }

    /// Walks `source_id` from `since`, stopping once `total` envelopes are seen.
    ///
    /// # Errors
    ///
    /// Propagates transport errors from the walk.
    pub async fn count_envelopes(
        &self,
        source_id: &str,
        since: DateTime<Utc>,
        total: u64,
    ) -> Result<u64> {
        let end = Utc::now() + TimeDelta::from_std(WALK_LOOKAHEAD).unwrap_or_default();
        let window = TimeWindow::new(since, end.max(since))?;
        let mut received: u64 = 0;
        walk(
            self.client.as_ref(),
            source_id,
            |page| {
                received += page.len() as u64;
                received < total
            },
            WalkOptions::new(window)
                .with_backoff(RetryBackoff::new(WALK_INTERVAL, WALK_MAX_RETRIES))
                .with_timeout(self.config.eventually_timeout),
        )
        .await?;
        Ok(received)
    }

    async fn logs_available(&self) -> Result<()> {
        let source_id = fresh_source_id();
        let since = Utc::now();
        self.emitter
            .emit_logs(std::slice::from_ref(&source_id))
            .await?;

        let expected = self.config.expected_per_source;
        let source_id = source_id.as_str();
        self.eventually()
            .should(
                move || self.count_envelopes(source_id, since, expected),
                at_least(ninety_nine_percent(expected)),
            )
            .await?;
        Ok(())
    }

    async fn meta_lists_source(&self) -> Result<()> {
        let source_id = fresh_source_id();
        self.emitter
            .emit_logs(std::slice::from_ref(&source_id))
            .await?;

        let threshold =
            i64::try_from(ninety_nine_percent(self.config.expected_per_source)).unwrap_or(i64::MAX);
        let source_id = source_id.as_str();
        let client = self.client.as_ref();
        self.eventually()
            .should(
                move || async move {
                    let meta = client.meta().await?;
                    Ok(meta.get(source_id).map_or(0, |info| info.count))
                },
                at_least(threshold),
            )
            .await?;
        Ok(())
    }

    async fn instant_query(&self) -> Result<()> {
        let source_id = fresh_source_id();
        self.emitter
            .emit_gauges(std::slice::from_ref(&source_id))
            .await?;

        let query = format!(r#"metric{{source_id="{source_id}"}}"#);
        let query = query.as_str();
        self.eventually()
            .should(
                move || self.instant_values(query),
                equal(vec![GAUGE_VALUE]),
            )
            .await?;
        Ok(())
    }

    async fn instant_query_math(&self) -> Result<()> {
        let first = fresh_source_id();
        let second = fresh_source_id();
        self.emitter
            .emit_gauges(&[first.clone(), second.clone()])
            .await?;

        let query = format!(
            r#"metric{{source_id="{first}"}} + ignoring(source_id) metric{{source_id="{second}"}}"#
        );
        let query = query.as_str();
        self.eventually()
            .should(
                move || self.instant_values(query),
                equal(vec![GAUGE_VALUE * 2.0]),
            )
            .await?;
        Ok(())
    }

    async fn instant_aggregation(&self) -> Result<()> {
        let source_id = fresh_source_id();
        self.emitter
            .emit_gauges(std::slice::from_ref(&source_id))
            .await?;

        let query = format!(r#"sum_over_time(metric{{source_id="{source_id}"}}[{INSTANT_LOOKBACK}])"#);
        let query = query.as_str();
        let expected = vec![expected_gauge_total(self.config.expected_per_source)];
        self.eventually()
            .should(move || self.instant_values(query), equal(expected.clone()))
            .await?;
        self.consistently()
            .should(move || self.instant_values(query), equal(expected))
            .await?;
        Ok(())
    }

    async fn range_aggregation(&self) -> Result<()> {
        let source_id = fresh_source_id();
        let since = Utc::now();
        self.emitter
            .emit_gauges(std::slice::from_ref(&source_id))
            .await?;

        let query = format!(
            r#"sum_over_time(metric{{source_id="{source_id}"}}[{}])"#,
            humantime::format_duration(RANGE_STEP)
        );
        let start = since - TimeDelta::from_std(RANGE_STEP).unwrap_or_default();
        let query = query.as_str();
        let client = self.client.as_ref();
        self.eventually()
            .should(
                move || async move {
                    let window = TimeWindow::new(start, Utc::now().max(start))?;
                    let result = client.range_query(query, window, RANGE_STEP).await?;
                    Ok(result.first_series_points().iter().map(|p| p.value).sum::<f64>())
                },
                equal(expected_gauge_total(self.config.expected_per_source)),
            )
            .await?;
        Ok(())
    }

    async fn instant_values(&self, query: &str) -> Result<Vec<f64>> {
        Ok(self.client.instant_query(query, None).await?.sample_values())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_scenario_names_roundtrip() {
        for scenario in Scenario::all() {
            assert_eq!(Scenario::parse(scenario.as_str()).unwrap(), *scenario);
            assert!(!scenario.description().is_empty());
        }
        assert_eq!(
            Scenario::parse("Range_Aggregation").unwrap(),
            Scenario::RangeAggregation
        );
        assert!(Scenario::parse("logs").is_err());
    }

    #[test_case(10_000, 9_900 ; "default volume")]
    #[test_case(100, 99 ; "small volume")]
    #[test_case(150, 148 ; "rounds down")]
    #[test_case(u64::MAX, u64::MAX / 100 * 99 + 15 * 99 / 100 ; "no overflow")]
    fn test_ninety_nine_percent(expected: u64, threshold: u64) {
        assert_eq!(ninety_nine_percent(expected), threshold);
    }

    #[test]
    fn test_expected_gauge_total() {
        assert!((expected_gauge_total(10_000) - 100_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_fresh_source_ids_differ() {
        assert_ne!(fresh_source_id(), fresh_source_id());
    }
}

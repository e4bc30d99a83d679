//! End-to-end tests over the HTTP gateway transport.
//!
//! An in-process axum server plays three roles at once: the store's HTTP
//! gateway, the UAA token endpoint and the log emitter. Emitted envelopes land
//! in memory and are served back through the read, meta and query endpoints,
//! so the full scenario harness runs against it.

// Integration tests use expect/unwrap/panic for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use chrono::Utc;
use lcats::client::{LogCacheClient, MetaReader, PageReader, QueryExecutor, ReadOptions, Transport};
use lcats::config::{OAuthConfig, SuiteConfig};
use lcats::emitter::LogEmitter;
use lcats::models::{EnvelopeType, QueryResult, TimeWindow};
use lcats::scenarios::{GAUGE_VALUE, Harness, Scenario};
use lcats::walk::{RetryBackoff, WalkOptions, WalkStop, walk};
use lcats::Error;
use secrecy::SecretString;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Fake gateway
// ============================================================================

/// Envelopes per source id per emit call.
const PER_SOURCE: u64 = 250;

/// Page size when a read sets no limit.
const DEFAULT_PAGE: usize = 100;

#[derive(Clone, Copy)]
struct Stored {
    timestamp: i64,
    gauge: bool,
}

#[derive(Default)]
struct FakeGateway {
    sources: Mutex<HashMap<String, Vec<Stored>>>,
    last_timestamp: Mutex<i64>,
    tokens_issued: AtomicU64,
    /// `expires_in` sent with issued tokens; zero means one hour.
    token_lifetime: AtomicU64,
    emit_calls: AtomicU64,
    revoked: AtomicBool,
}

impl FakeGateway {
    fn current_token(&self) -> String {
        format!("token-{}", self.tokens_issued.load(Ordering::SeqCst))
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        if self.revoked.swap(false, Ordering::SeqCst) {
            return false;
        }
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == format!("Bearer {}", self.current_token()))
    }

    /// Strictly increasing nanosecond timestamps near the wall clock.
    fn next_timestamp(&self) -> i64 {
        let mut last = self.last_timestamp.lock().unwrap();
        let now = Utc::now().timestamp_nanos_opt().unwrap();
        *last = now.max(*last + 1);
        *last
    }

    fn store(&self, source_ids: &[String], gauge: bool) {
        for source_id in source_ids {
            let batch: Vec<Stored> = (0..PER_SOURCE)
                .map(|_| Stored {
                    timestamp: self.next_timestamp(),
                    gauge,
                })
                .collect();
            self.sources
                .lock()
                .unwrap()
                .entry(source_id.clone())
                .or_default()
                .extend(batch);
        }
    }

    fn gauges(&self, source_id: &str) -> Vec<i64> {
        self.sources
            .lock()
            .unwrap()
            .get(source_id)
            .map(|stored| {
                stored
                    .iter()
                    .filter(|s| s.gauge)
                    .map(|s| s.timestamp)
                    .collect()
            })
            .unwrap_or_default()
    }
}

type Shared = Arc<FakeGateway>;

async fn start() -> (SocketAddr, Shared) {
    let fake = Shared::default();
    let app = Router::new()
        .route("/oauth/token", post(issue_token))
        .route("/api/v1/read/{source_id}", get(read))
        .route("/api/v1/meta", get(meta))
        .route("/api/v1/query", get(instant_query))
        .route("/api/v1/query_range", get(range_query))
        .route("/emit-logs", get(emit_logs))
        .route("/emit-gauges", get(emit_gauges))
        .with_state(Arc::clone(&fake));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, fake)
}

async fn issue_token(
    State(fake): State<Shared>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let basic = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("Basic "));
    if !basic || form.get("grant_type").map(String::as_str) != Some("client_credentials") {
        return (StatusCode::UNAUTHORIZED, "bad client").into_response();
    }
    let n = fake.tokens_issued.fetch_add(1, Ordering::SeqCst) + 1;
    let expires_in = match fake.token_lifetime.load(Ordering::SeqCst) {
        0 => 3600,
        secs => secs,
    };
    Json(json!({
        "access_token": format!("token-{n}"),
        "token_type": "bearer",
        "expires_in": expires_in,
    }))
    .into_response()
}

async fn read(
    State(fake): State<Shared>,
    Path(source_id): Path<String>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if !fake.authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, "invalid token").into_response();
    }
    let param = |key: &str| params.get(key).and_then(|v| v.parse::<i64>().ok());
    let (Some(start), Some(end)) = (param("start_time"), param("end_time")) else {
        return (StatusCode::BAD_REQUEST, "start_time and end_time required").into_response();
    };
    let limit = param("limit").map_or(DEFAULT_PAGE, |l| usize::try_from(l).unwrap());

    let sources = fake.sources.lock().unwrap();
    let batch: Vec<Value> = sources
        .get(&source_id)
        .into_iter()
        .flatten()
        .filter(|s| start <= s.timestamp && s.timestamp <= end)
        .take(limit)
        .map(|s| {
            let mut envelope = json!({
                "timestamp": s.timestamp.to_string(),
                "sourceId": source_id,
                "instanceId": "0",
            });
            if s.gauge {
                envelope["gauge"] = json!({"metrics": {"metric": {"value": GAUGE_VALUE}}});
            } else {
                envelope["log"] = json!({"payload": "bG9nIGxpbmU=", "type": "OUT"});
            }
            envelope
        })
        .collect();
    Json(json!({"envelopes": {"batch": batch}})).into_response()
}

async fn meta(State(fake): State<Shared>, headers: HeaderMap) -> Response {
    if !fake.authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, "invalid token").into_response();
    }
    let sources = fake.sources.lock().unwrap();
    let meta: serde_json::Map<String, Value> = sources
        .iter()
        .map(|(source_id, stored)| {
            let oldest = stored.first().map_or(0, |s| s.timestamp);
            let newest = stored.last().map_or(0, |s| s.timestamp);
            (
                source_id.clone(),
                json!({
                    "count": stored.len().to_string(),
                    "expired": "0",
                    "oldestTimestamp": oldest.to_string(),
                    "newestTimestamp": newest.to_string(),
                }),
            )
        })
        .collect();
    Json(json!({"meta": meta})).into_response()
}

/// Every `source_id="..."` matcher in a query, in order.
fn source_ids(query: &str) -> Vec<String> {
    query
        .split("source_id=\"")
        .skip(1)
        .filter_map(|rest| rest.split('"').next())
        .map(str::to_string)
        .collect()
}

fn seconds(nanos: i64) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let secs = nanos as f64 / 1e9;
    secs
}

fn bad_query(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"status": "error", "errorType": "bad_data", "error": message})),
    )
        .into_response()
}

fn prom(result_type: &str, result: Vec<Value>) -> Response {
    Json(json!({
        "status": "success",
        "data": {"resultType": result_type, "result": result},
    }))
    .into_response()
}

/// Understands the three query shapes the scenarios send: a bare selector,
/// two selectors added together, and `sum_over_time` over one selector.
async fn instant_query(
    State(fake): State<Shared>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if !fake.authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, "invalid token").into_response();
    }
    let query = params.get("query").cloned().unwrap_or_default();
    let ids = source_ids(&query);
    if ids.is_empty() {
        return bad_query("parse error: expected a source_id matcher");
    }
    let now = seconds(Utc::now().timestamp_nanos_opt().unwrap());

    let gauges: Vec<Vec<i64>> = ids.iter().map(|id| fake.gauges(id)).collect();
    if gauges.iter().any(Vec::is_empty) {
        return prom("vector", Vec::new());
    }

    #[allow(clippy::cast_precision_loss)]
    let value = if query.starts_with("sum_over_time(") {
        gauges[0].len() as f64 * GAUGE_VALUE
    } else {
        GAUGE_VALUE * gauges.len() as f64
    };
    prom(
        "vector",
        vec![json!({"metric": {}, "value": [now, value.to_string()]})],
    )
}

/// Evaluates `sum_over_time(selector[step])` at `end`, `end - step`, ... down to `start`.
async fn range_query(
    State(fake): State<Shared>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if !fake.authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, "invalid token").into_response();
    }
    let query = params.get("query").cloned().unwrap_or_default();
    let parse = |key: &str| params.get(key).and_then(|v| v.parse::<f64>().ok());
    let (Some(start), Some(end)) = (parse("start"), parse("end")) else {
        return bad_query("start and end required");
    };
    let Some(step) = params
        .get("step")
        .and_then(|s| humantime::parse_duration(s).ok())
        .map(|d| d.as_secs_f64())
        .filter(|s| *s > 0.0)
    else {
        return bad_query("invalid step");
    };
    let Some(source_id) = source_ids(&query).into_iter().next() else {
        return bad_query("parse error: expected a source_id matcher");
    };

    let gauges: Vec<f64> = fake.gauges(&source_id).into_iter().map(seconds).collect();
    if gauges.is_empty() {
        return prom("matrix", Vec::new());
    }

    let mut values = Vec::new();
    let mut t = end;
    while t >= start {
        #[allow(clippy::cast_precision_loss)]
        let sum = gauges.iter().filter(|&&g| t - step < g && g <= t).count() as f64 * GAUGE_VALUE;
        if sum > 0.0 {
            values.push(json!([t, sum.to_string()]));
        }
        t -= step;
    }
    values.reverse();
    prom(
        "matrix",
        vec![json!({"metric": {"source_id": source_id}, "values": values})],
    )
}

async fn emit_logs(
    State(fake): State<Shared>,
    Query(params): Query<Vec<(String, String)>>,
) -> StatusCode {
    emit(&fake, &params, false)
}

async fn emit_gauges(
    State(fake): State<Shared>,
    Query(params): Query<Vec<(String, String)>>,
) -> StatusCode {
    emit(&fake, &params, true)
}

fn emit(fake: &FakeGateway, params: &[(String, String)], gauge: bool) -> StatusCode {
    fake.emit_calls.fetch_add(1, Ordering::SeqCst);
    let ids: Vec<String> = params
        .iter()
        .filter(|(key, _)| key == "sourceIDs")
        .map(|(_, value)| value.clone())
        .collect();
    if ids.is_empty() {
        return StatusCode::BAD_REQUEST;
    }
    fake.store(&ids, gauge);
    StatusCode::OK
}

// ============================================================================
// Test Helpers
// ============================================================================

fn config(addr: SocketAddr) -> SuiteConfig {
    SuiteConfig {
        log_cache_http_url: format!("http://{addr}"),
        log_emitter_addr: addr.to_string(),
        oauth: Some(OAuthConfig {
            uaa_url: format!("http://{addr}/"),
            client_id: "lcats".to_string(),
            client_secret: SecretString::from("secret".to_string()),
        }),
        default_timeout: Duration::from_secs(5),
        wait_for_logs: Duration::ZERO,
        expected_per_source: PER_SOURCE,
        eventually_timeout: Duration::from_secs(10),
        consistently_duration: Duration::from_millis(300),
        polling_interval: Duration::from_millis(25),
        ..SuiteConfig::default()
    }
}

async fn harness(addr: SocketAddr) -> Harness<LogCacheClient> {
    let config = Arc::new(config(addr));
    let client = LogCacheClient::http(&config).unwrap();
    let emitter = LogEmitter::new(&config).unwrap();
    Harness::new(config, client, Transport::Http, emitter)
}

fn last_minute() -> TimeWindow {
    let now = Utc::now();
    TimeWindow::new(now - chrono::TimeDelta::minutes(1), now + chrono::TimeDelta::minutes(1)).unwrap()
}

// ============================================================================
// Client operations
// ============================================================================

#[tokio::test]
async fn test_read_pages_through_gateway() {
    let (addr, fake) = start().await;
    let client = LogCacheClient::http(&config(addr)).unwrap();
    fake.store(&["app".to_string()], false);

    let page = client
        .read("app", last_minute(), &ReadOptions::new().with_limit(40))
        .await
        .unwrap();
    assert_eq!(page.len(), 40);
    assert!(page.iter().all(|e| e.kind == EnvelopeType::Log && e.source_id == "app"));
    assert!(page.windows(2).all(|pair| pair[0].timestamp < pair[1].timestamp));

    let result = walk(
        &client,
        "app",
        |_| true,
        WalkOptions::new(last_minute())
            .with_limit(60)
            .with_backoff(RetryBackoff::new(Duration::from_millis(10), 2)),
    )
    .await
    .unwrap();
    assert_eq!(result.envelopes.len() as u64, PER_SOURCE);
    assert_eq!(result.retries, 2);
    assert_eq!(result.stop, WalkStop::BackoffExhausted);

    // One token serves every request.
    assert_eq!(fake.tokens_issued.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unknown_source_reads_empty() {
    let (addr, _fake) = start().await;
    let client = LogCacheClient::http(&config(addr)).unwrap();

    let page = client
        .read("nobody", last_minute(), &ReadOptions::new())
        .await
        .unwrap();
    assert!(page.is_empty());
}

#[tokio::test]
async fn test_rejected_token_is_refreshed() {
    let (addr, fake) = start().await;
    let client = LogCacheClient::http(&config(addr)).unwrap();
    fake.store(&["app".to_string()], false);

    client.meta().await.unwrap();
    fake.revoked.store(true, Ordering::SeqCst);

    let err = client.meta().await.unwrap_err();
    assert!(err.is_transport(), "{err}");

    let meta = client.meta().await.unwrap();
    assert_eq!(meta["app"].count, i64::try_from(PER_SOURCE).unwrap());
    assert_eq!(fake.tokens_issued.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_token_with_unbounded_lifetime_is_cached() {
    let (addr, fake) = start().await;
    fake.token_lifetime.store(u64::MAX, Ordering::SeqCst);
    let client = LogCacheClient::http(&config(addr)).unwrap();
    fake.store(&["app".to_string()], false);

    client.meta().await.unwrap();
    let meta = client.meta().await.unwrap();
    assert_eq!(meta["app"].count, i64::try_from(PER_SOURCE).unwrap());
    assert_eq!(fake.tokens_issued.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_meta_reports_counts_and_timestamps() {
    let (addr, fake) = start().await;
    let client = LogCacheClient::http(&config(addr)).unwrap();
    fake.store(&["a".to_string(), "b".to_string()], true);

    let meta = client.meta().await.unwrap();
    assert_eq!(meta.len(), 2);
    let info = &meta["b"];
    assert_eq!(info.count, i64::try_from(PER_SOURCE).unwrap());
    assert_eq!(info.expired, 0);
    assert!(info.oldest_timestamp < info.newest_timestamp);
}

#[tokio::test]
async fn test_instant_query_decodes_vector() {
    let (addr, fake) = start().await;
    let client = LogCacheClient::http(&config(addr)).unwrap();
    fake.store(&["gauge-src".to_string()], true);

    let result = client
        .instant_query(r#"metric{source_id="gauge-src"}"#, None)
        .await
        .unwrap();
    assert!(matches!(result, QueryResult::Vector(_)));
    assert_eq!(result.sample_values(), vec![GAUGE_VALUE]);
}

#[tokio::test]
async fn test_rejected_query_is_a_query_error() {
    let (addr, _fake) = start().await;
    let client = LogCacheClient::http(&config(addr)).unwrap();

    let err = client.instant_query("metric{", None).await.unwrap_err();
    match err {
        Error::Query { query, cause } => {
            assert_eq!(query, "metric{");
            assert!(cause.contains("parse error"), "{cause}");
        },
        other => panic!("expected a query error, got {other}"),
    }
}

#[tokio::test]
async fn test_range_query_decodes_matrix() {
    let (addr, fake) = start().await;
    let client = LogCacheClient::http(&config(addr)).unwrap();
    fake.store(&["range-src".to_string()], true);

    let result = client
        .range_query(
            r#"sum_over_time(metric{source_id="range-src"}[5s])"#,
            last_minute(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    let total: f64 = result.first_series_points().iter().map(|p| p.value).sum();
    #[allow(clippy::cast_precision_loss)]
    let expected = PER_SOURCE as f64 * GAUGE_VALUE;
    assert!((total - expected).abs() < f64::EPSILON, "{total}");
}

#[tokio::test]
async fn test_unreachable_gateway_is_a_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = config(addr);
    config.oauth = None;
    config.default_timeout = Duration::from_secs(1);
    let client = LogCacheClient::http(&config).unwrap();

    let err = client
        .read("app", last_minute(), &ReadOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transport { .. }), "{err}");
}

// ============================================================================
// Scenarios end to end
// ============================================================================

#[tokio::test]
async fn test_every_scenario_passes_sequentially() {
    let (addr, fake) = start().await;
    let harness = harness(addr).await;

    let reports = harness.run_all(Scenario::all(), false).await;

    assert_eq!(reports.len(), Scenario::all().len());
    for (report, scenario) in reports.iter().zip(Scenario::all()) {
        assert_eq!(report.scenario, *scenario);
        assert_eq!(report.transport, Transport::Http);
        assert!(report.passed(), "{}: {:?}", scenario, report.failure);
    }
    assert_eq!(fake.emit_calls.load(Ordering::SeqCst), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_scenario_passes_in_parallel() {
    let (addr, _fake) = start().await;
    let harness = harness(addr).await;

    let reports = harness.run_all(Scenario::all(), true).await;

    let order: Vec<Scenario> = reports.iter().map(|r| r.scenario).collect();
    assert_eq!(order, Scenario::all().to_vec());
    assert!(reports.iter().all(lcats::scenarios::ScenarioReport::passed));
}

#[tokio::test]
async fn test_scenario_fails_when_store_drops_data() {
    let (addr, _fake) = start().await;
    let mut config = config(addr);
    // The store keeps 250 per source; demanding 99% of 1000 can never pass.
    config.expected_per_source = 1_000;
    config.eventually_timeout = Duration::from_millis(500);
    let config = Arc::new(config);
    let client = LogCacheClient::http(&config).unwrap();
    let emitter = LogEmitter::new(&config).unwrap();
    let harness = Harness::new(config, client, Transport::Http, emitter);

    let report = harness.run(Scenario::MetaListsSource).await;

    assert!(!report.passed());
    let failure = report.failure.unwrap();
    assert!(failure.contains("at least 990"), "{failure}");
    assert!(failure.contains("250"), "{failure}");
}

#[tokio::test]
async fn test_emitter_rejects_empty_source_list() {
    let (addr, fake) = start().await;
    let emitter = LogEmitter::new(&config(addr)).unwrap();

    let err = emitter.emit_logs(&[]).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert_eq!(fake.emit_calls.load(Ordering::SeqCst), 0);
}

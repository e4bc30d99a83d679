//! Binary entry point for lcats.
//!
//! Runs the acceptance scenarios against a Log Cache deployment, and exposes
//! the underlying read, meta and query operations for ad-hoc inspection.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use lcats::client::{LogCacheClient, MetaReader, QueryExecutor, Transport};
use lcats::config::SuiteConfig;
use lcats::emitter::LogEmitter;
use lcats::models::{QueryResult, TimeWindow};
use lcats::observability::{self, LogFormat, LoggingConfig, ObservabilityConfig};
use lcats::scenarios::{Harness, Scenario, ScenarioReport};
use lcats::walk::{RetryBackoff, WalkOptions, walk};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

/// Log Cache acceptance tests.
#[derive(Parser)]
#[command(name = "lcats")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "LCATS_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format.
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormatArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Pretty,
    Json,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TransportArg {
    Grpc,
    Http,
    All,
}

impl TransportArg {
    fn transports(self) -> &'static [Transport] {
        match self {
            Self::Grpc => &[Transport::Grpc],
            Self::Http => &[Transport::Http],
            Self::All => Transport::all(),
        }
    }

    fn single(self) -> Result<Transport> {
        match self {
            Self::Grpc => Ok(Transport::Grpc),
            Self::Http => Ok(Transport::Http),
            Self::All => bail!("this command needs a single transport, grpc or http"),
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Run acceptance scenarios.
    Run {
        /// Transport to test.
        #[arg(short, long, value_enum, default_value = "all")]
        transport: TransportArg,

        /// Scenario to run; repeatable. Runs every scenario when omitted.
        #[arg(short, long = "scenario")]
        scenarios: Vec<String>,

        /// Run scenarios of a transport concurrently.
        #[arg(long)]
        parallel: bool,

        /// Write Prometheus metrics here when the run ends.
        #[arg(long)]
        metrics_file: Option<PathBuf>,
    },

    /// Walk one source id and print what was read.
    Walk {
        /// Source id to read.
        source_id: String,

        /// How far back to start.
        #[arg(long, default_value = "5m", value_parser = humantime::parse_duration)]
        since: Duration,

        /// Retries on empty pages.
        #[arg(long, default_value = "0")]
        retries: u32,

        /// Wait between retries.
        #[arg(long, default_value = "50ms", value_parser = humantime::parse_duration)]
        interval: Duration,

        /// Page size.
        #[arg(long)]
        limit: Option<u32>,

        /// Transport to read over.
        #[arg(short, long, value_enum, default_value = "grpc")]
        transport: TransportArg,
    },

    /// Evaluate a PromQL query.
    Query {
        /// The query.
        promql: String,

        /// Evaluate as a range query over this much history.
        #[arg(long, value_parser = humantime::parse_duration)]
        range: Option<Duration>,

        /// Range query step.
        #[arg(long, default_value = "5s", value_parser = humantime::parse_duration)]
        step: Duration,

        /// Transport to query over.
        #[arg(short, long, value_enum, default_value = "grpc")]
        transport: TransportArg,
    },

    /// Print per-source counts.
    Meta {
        /// Transport to read over.
        #[arg(short, long, value_enum, default_value = "grpc")]
        transport: TransportArg,
    },

    /// List the available scenarios.
    List,
}

/// Main entry point.
#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        },
    };

    let wants_metrics = matches!(
        cli.command,
        Commands::Run {
            metrics_file: Some(_),
            ..
        }
    );
    let format = cli.log_format.map(|f| match f {
        LogFormatArg::Pretty => LogFormat::Pretty,
        LogFormatArg::Json => LogFormat::Json,
    });
    let observability = match observability::init(ObservabilityConfig {
        logging: LoggingConfig::from_env(cli.verbose, format),
        metrics: wants_metrics,
    }) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to initialize observability: {e}");
            return ExitCode::FAILURE;
        },
    };

    let result = tokio::select! {
        result = run_command(cli.command, Arc::new(config), &observability) => result,
        _ = tokio::signal::ctrl_c() => Err(anyhow::anyhow!("interrupted")),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Loads configuration: file, then environment.
fn load_config(path: Option<&Path>) -> Result<SuiteConfig> {
    let config = match path {
        Some(path) => SuiteConfig::load_from_file(path)?,
        None => SuiteConfig::load_default()?,
    };
    Ok(config.with_env_overrides()?)
}

/// Runs the selected command; `Ok(false)` means a scenario failed.
async fn run_command(
    command: Commands,
    config: Arc<SuiteConfig>,
    observability: &observability::ObservabilityHandle,
) -> Result<bool> {
    match command {
        Commands::Run {
            transport,
            scenarios,
            parallel,
            metrics_file,
        } => {
            let scenarios = parse_scenarios(&scenarios)?;
            let passed = cmd_run(&config, transport.transports(), &scenarios, parallel).await?;
            if let (Some(path), Some(metrics)) = (metrics_file, observability.metrics()) {
                metrics.write_to(&path)?;
            }
            Ok(passed)
        },
        Commands::Walk {
            source_id,
            since,
            retries,
            interval,
            limit,
            transport,
        } => {
            let client = LogCacheClient::for_transport(transport.single()?, &config)?;
            cmd_walk(&client, &source_id, since, retries, interval, limit).await?;
            Ok(true)
        },
        Commands::Query {
            promql,
            range,
            step,
            transport,
        } => {
            let client = LogCacheClient::for_transport(transport.single()?, &config)?;
            cmd_query(&client, &promql, range, step).await?;
            Ok(true)
        },
        Commands::Meta { transport } => {
            let client = LogCacheClient::for_transport(transport.single()?, &config)?;
            cmd_meta(&client).await?;
            Ok(true)
        },
        Commands::List => {
            for scenario in Scenario::all() {
                println!("{:<22} {}", scenario.as_str(), scenario.description());
            }
            Ok(true)
        },
    }
}

fn parse_scenarios(names: &[String]) -> Result<Vec<Scenario>> {
    if names.is_empty() {
        return Ok(Scenario::all().to_vec());
    }
    names
        .iter()
        .map(|name| Scenario::parse(name).map_err(Into::into))
        .collect()
}

async fn cmd_run(
    config: &Arc<SuiteConfig>,
    transports: &[Transport],
    scenarios: &[Scenario],
    parallel: bool,
) -> Result<bool> {
    let mut reports: Vec<ScenarioReport> = Vec::new();
    for &transport in transports {
        let client = LogCacheClient::for_transport(transport, config)
            .with_context(|| format!("building {transport} client"))?;
        let emitter = LogEmitter::new(config)?;
        let harness = Harness::new(Arc::clone(config), client, transport, emitter);
        reports.extend(harness.run_all(scenarios, parallel).await);
    }

    for report in &reports {
        let status = if report.passed() { "PASS" } else { "FAIL" };
        println!(
            "{status}  {:<5} {:<22} {:>8}",
            report.transport.as_str(),
            report.scenario.as_str(),
            humantime::format_duration(round_to_millis(report.elapsed)).to_string(),
        );
        if let Some(failure) = &report.failure {
            println!("      {failure}");
        }
    }

    let failed = reports.iter().filter(|r| !r.passed()).count();
    println!();
    println!("{} passed, {failed} failed", reports.len() - failed);
    Ok(failed == 0)
}

fn round_to_millis(d: Duration) -> Duration {
    Duration::from_millis(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

async fn cmd_walk(
    client: &LogCacheClient,
    source_id: &str,
    since: Duration,
    retries: u32,
    interval: Duration,
    limit: Option<u32>,
) -> Result<()> {
    let mut options =
        WalkOptions::new(TimeWindow::last(since)).with_backoff(RetryBackoff::new(interval, retries));
    if let Some(limit) = limit {
        options = options.with_limit(limit);
    }

    let result = walk(client, source_id, |_| true, options).await?;
    for envelope in &result.envelopes {
        println!(
            "{} {:<7} {}",
            envelope.timestamp, envelope.kind, envelope.instance_id
        );
    }
    println!(
        "{} envelopes in {} pages ({} retries), stopped: {}",
        result.envelopes.len(),
        result.pages,
        result.retries,
        result.stop
    );
    Ok(())
}

async fn cmd_query(
    client: &LogCacheClient,
    promql: &str,
    range: Option<Duration>,
    step: Duration,
) -> Result<()> {
    let result = match range {
        Some(range) => {
            client
                .range_query(promql, TimeWindow::last(range), step)
                .await?
        },
        None => client.instant_query(promql, None).await?,
    };
    print_query_result(&result);
    Ok(())
}

fn print_query_result(result: &QueryResult) {
    match result {
        QueryResult::Scalar(point) => println!("scalar {} @ {}", point.value, point.time),
        QueryResult::Vector(samples) => {
            for sample in samples {
                println!("{:?} => {} @ {}", sample.metric, sample.point.value, sample.point.time);
            }
        },
        QueryResult::Matrix(series) => {
            for s in series {
                println!("{:?}", s.metric);
                for point in &s.points {
                    println!("  {} @ {}", point.value, point.time);
                }
            }
        },
    }
}

async fn cmd_meta(client: &LogCacheClient) -> Result<()> {
    let meta = client.meta().await?;
    let mut sources: Vec<_> = meta.into_iter().collect();
    sources.sort_by(|a, b| a.0.cmp(&b.0));
    println!("{:<40} {:>10} {:>10}", "SOURCE ID", "COUNT", "EXPIRED");
    for (source_id, info) in sources {
        println!("{source_id:<40} {:>10} {:>10}", info.count, info.expired);
    }
    Ok(())
}

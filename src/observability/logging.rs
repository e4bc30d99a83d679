//! Structured logging configuration.

use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "lcats=info";

/// Filter used with `--verbose` when `RUST_LOG` is unset.
const VERBOSE_FILTER: &str = "lcats=debug";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parses a format name; unknown names fall back to pretty.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Logging configuration.
#[derive(Debug)]
pub struct LoggingConfig {
    /// Event filter.
    pub filter: EnvFilter,
    /// Output format.
    pub format: LogFormat,
    /// Write to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Builds logging configuration from `RUST_LOG`, `LCATS_LOG_FORMAT` and
    /// `LCATS_LOG_FILE`.
    ///
    /// An explicit `format` wins over `LCATS_LOG_FORMAT`.
    #[must_use]
    pub fn from_env(verbose: bool, format: Option<LogFormat>) -> Self {
        Self::from_lookup(verbose, format, |key| std::env::var(key).ok())
    }

    /// Same as [`LoggingConfig::from_env`] with a custom variable lookup.
    #[must_use]
    pub fn from_lookup<F>(verbose: bool, format: Option<LogFormat>, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let fallback = if verbose {
            VERBOSE_FILTER
        } else {
            DEFAULT_FILTER
        };
        let filter = lookup(EnvFilter::DEFAULT_ENV)
            .and_then(|directives| EnvFilter::try_new(directives).ok())
            .unwrap_or_else(|| EnvFilter::new(fallback));
        let format = format
            .or_else(|| lookup("LCATS_LOG_FORMAT").map(|v| LogFormat::parse(&v)))
            .unwrap_or_default();
        let file = lookup("LCATS_LOG_FILE")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        Self {
            filter,
            format,
            file,
        }
    }
}

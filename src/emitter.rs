//! Trigger for the synthetic data generator.
//!
//! The log emitter writes a fixed volume per source id into the store:
//! 10,000 log envelopes for `/emit-logs`, 10,000 gauges named `metric` with
//! value 10.0 for `/emit-gauges`. After a successful trigger the harness waits
//! `wait_for_logs` so the data can reach the store before it starts polling.

use crate::config::SuiteConfig;
use crate::{Error, Result};
use reqwest::StatusCode;
use std::time::Duration;

/// What to ask the emitter for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitKind {
    /// Log envelopes.
    Logs,
    /// Gauge envelopes.
    Gauges,
}

impl EmitKind {
    const fn path(self) -> &'static str {
        match self {
            Self::Logs => "emit-logs",
            Self::Gauges => "emit-gauges",
        }
    }
}

/// HTTP client for the log emitter.
#[derive(Debug, Clone)]
pub struct LogEmitter {
    http: reqwest::Client,
    base_url: String,
    settle: Duration,
}

impl LogEmitter {
    /// Builds an emitter client for `config.log_emitter_addr`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the HTTP client cannot be constructed.
    pub fn new(config: &SuiteConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.default_timeout)
            .build()
            .map_err(|e| Error::Config {
                operation: "build emitter client".to_string(),
                cause: e.to_string(),
            })?;
        let addr = config.log_emitter_addr.trim_end_matches('/');
        let base_url = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.to_string()
        } else {
            format!("http://{addr}")
        };
        Ok(Self {
            http,
            base_url,
            settle: config.wait_for_logs,
        })
    }

    /// Emits log envelopes for every source id, then waits for them to settle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] unless the emitter answers `200 OK`.
    pub async fn emit_logs(&self, source_ids: &[String]) -> Result<()> {
        self.emit(EmitKind::Logs, source_ids).await
    }

    /// Emits gauge envelopes for every source id, then waits for them to settle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] unless the emitter answers `200 OK`.
    pub async fn emit_gauges(&self, source_ids: &[String]) -> Result<()> {
        self.emit(EmitKind::Gauges, source_ids).await
    }

    /// Triggers `kind` for `source_ids` and waits for the settle period.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an empty source id list and
    /// [`Error::Transport`] unless the emitter answers `200 OK`.
    pub async fn emit(&self, kind: EmitKind, source_ids: &[String]) -> Result<()> {
        if source_ids.is_empty() {
            return Err(Error::InvalidInput(
                "at least one source id is required".to_string(),
            ));
        }
        let operation = kind.path();
        let url = format!("{}/{operation}", self.base_url);
        let query: Vec<(&str, &str)> = source_ids
            .iter()
            .map(|id| ("sourceIDs", id.as_str()))
            .collect();

        tracing::info!(
            kind = operation,
            sources = source_ids.len(),
            "Triggering log emitter"
        );

        let response = self
            .http
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| Error::transport(operation, e))?;
        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::transport(
                operation,
                format!("emitter returned {status}: {}", body.trim()),
            ));
        }

        tokio::time::sleep(self.settle).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_gets_a_scheme() {
        let config = SuiteConfig::default().with_log_emitter_addr("emitter:8081");
        assert_eq!(
            LogEmitter::new(&config).unwrap().base_url,
            "http://emitter:8081"
        );

        let config = SuiteConfig::default().with_log_emitter_addr("https://emitter/");
        assert_eq!(LogEmitter::new(&config).unwrap().base_url, "https://emitter");
    }

    #[tokio::test]
    async fn test_empty_source_list_is_rejected() {
        let emitter = LogEmitter::new(&SuiteConfig::default()).unwrap();
        assert!(matches!(
            emitter.emit_logs(&[]).await,
            Err(Error::InvalidInput(_))
        ));
    }
}

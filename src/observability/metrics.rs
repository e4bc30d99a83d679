//! Prometheus metrics.
//!
//! The harness is a short-lived process, so metrics are rendered once at the
//! end of a run instead of being scraped.

use crate::{Error, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::path::Path;

/// Handle to the installed Prometheus recorder.
#[derive(Debug, Clone)]
pub struct MetricsHandle {
    prometheus: PrometheusHandle,
}

impl MetricsHandle {
    /// Renders everything recorded so far in the exposition format.
    #[must_use]
    pub fn render(&self) -> String {
        self.prometheus.render()
    }

    /// Writes the rendered metrics to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let mut payload = self.render();
        if !payload.ends_with('\n') {
            payload.push('\n');
        }
        std::fs::write(path, payload).map_err(|e| Error::Config {
            operation: format!("write metrics to {}", path.display()),
            cause: e.to_string(),
        })?;
        tracing::debug!(path = %path.display(), "Wrote metrics");
        Ok(())
    }
}

/// Installs the Prometheus recorder as the global `metrics` recorder.
///
/// # Errors
///
/// Returns an error if a global recorder is already installed.
pub fn install_prometheus() -> Result<MetricsHandle> {
    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::Config {
            operation: "install metrics recorder".to_string(),
            cause: e.to_string(),
        })?;
    Ok(MetricsHandle { prometheus })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_to_renders_local_recorder() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = MetricsHandle {
            prometheus: recorder.handle(),
        };
        metrics::with_local_recorder(&recorder, || {
            metrics::counter!("scenario_runs_total", "outcome" => "passed").increment(2);
        });

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.prom");
        handle.write_to(&path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("scenario_runs_total{outcome=\"passed\"} 2"));
    }
}

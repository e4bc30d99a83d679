//! Configuration management.
//!
//! [`SuiteConfig`] is assembled once, in order of increasing precedence:
//!
//! 1. Built-in defaults
//! 2. A TOML file (`--config`, or `<config_dir>/lcats/config.toml`)
//! 3. Environment variables (`LOG_CACHE_ADDR`, `CLIENT_SECRET`, ...)
//!
//! After that it is immutable and passed around by reference.

use crate::{Error, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default TLS server name of the store's gRPC endpoint.
pub const DEFAULT_SERVER_NAME: &str = "log-cache";

/// Harness configuration.
#[derive(Debug, Clone)]
pub struct SuiteConfig {
    /// gRPC address of the store, `host:port`.
    pub log_cache_addr: String,
    /// Base URL of the store's HTTP gateway (the CF auth proxy).
    pub log_cache_http_url: String,
    /// Address of the log emitter, `host:port`.
    pub log_emitter_addr: String,
    /// OAuth2 client credentials; `None` sends unauthenticated requests.
    pub oauth: Option<OAuthConfig>,
    /// Skip TLS certificate verification on HTTP requests.
    pub skip_cert_verify: bool,
    /// Mutual TLS material for the gRPC transport.
    pub tls: TlsConfig,
    /// Timeout applied to every network call.
    pub default_timeout: Duration,
    /// Time to wait after triggering the emitter.
    pub wait_for_logs: Duration,
    /// Envelopes the emitter writes per source id.
    pub expected_per_source: u64,
    /// Budget of each `Eventually` assertion.
    pub eventually_timeout: Duration,
    /// Duration of each `Consistently` assertion.
    pub consistently_duration: Duration,
    /// Interval between convergence polls.
    pub polling_interval: Duration,
}

/// OAuth2 client-credentials configuration.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    /// Token issuer base URL; `/oauth/token` is appended.
    pub uaa_url: String,
    /// Client id.
    pub client_id: String,
    /// Client secret.
    pub client_secret: SecretString,
}

/// Mutual TLS configuration for gRPC.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// CA bundle used to verify the store.
    pub ca_path: Option<PathBuf>,
    /// Client certificate.
    pub cert_path: Option<PathBuf>,
    /// Client private key.
    pub key_path: Option<PathBuf>,
    /// Server name the store's certificate is checked against.
    pub server_name: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            ca_path: None,
            cert_path: None,
            key_path: None,
            server_name: DEFAULT_SERVER_NAME.to_string(),
        }
    }
}

impl TlsConfig {
    /// True when CA, certificate and key are all configured.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.ca_path.is_some() && self.cert_path.is_some() && self.key_path.is_some()
    }
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            log_cache_addr: "localhost:8080".to_string(),
            log_cache_http_url: "http://localhost:8083".to_string(),
            log_emitter_addr: "localhost:8081".to_string(),
            oauth: None,
            skip_cert_verify: false,
            tls: TlsConfig::default(),
            default_timeout: Duration::from_secs(30),
            wait_for_logs: Duration::from_secs(5),
            expected_per_source: 10_000,
            eventually_timeout: Duration::from_secs(60),
            consistently_duration: Duration::from_secs(30),
            polling_interval: Duration::from_millis(100),
        }
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// gRPC address.
    pub log_cache_addr: Option<String>,
    /// HTTP gateway URL.
    pub log_cache_http_url: Option<String>,
    /// Emitter address.
    pub log_emitter_addr: Option<String>,
    /// Skip certificate verification.
    pub skip_cert_verify: Option<bool>,
    /// Network call timeout.
    #[serde(default, with = "humantime_serde")]
    pub default_timeout: Option<Duration>,
    /// Wait after emitting.
    #[serde(default, with = "humantime_serde")]
    pub wait_for_logs: Option<Duration>,
    /// Envelopes per source id.
    pub expected_per_source: Option<u64>,
    /// Convergence settings.
    pub convergence: Option<ConfigFileConvergence>,
    /// OAuth2 settings.
    pub oauth: Option<ConfigFileOAuth>,
    /// TLS settings.
    pub tls: Option<ConfigFileTls>,
}

/// Convergence section in config file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileConvergence {
    /// `Eventually` budget.
    #[serde(default, with = "humantime_serde")]
    pub eventually_timeout: Option<Duration>,
    /// `Consistently` duration.
    #[serde(default, with = "humantime_serde")]
    pub consistently_duration: Option<Duration>,
    /// Poll interval.
    #[serde(default, with = "humantime_serde")]
    pub polling_interval: Option<Duration>,
}

/// OAuth2 section in config file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileOAuth {
    /// Token issuer URL.
    pub uaa_url: Option<String>,
    /// Client id.
    pub client_id: Option<String>,
    /// Client secret.
    pub client_secret: Option<String>,
}

/// TLS section in config file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileTls {
    /// CA bundle path.
    pub ca_path: Option<PathBuf>,
    /// Client certificate path.
    pub cert_path: Option<PathBuf>,
    /// Client key path.
    pub key_path: Option<PathBuf>,
    /// Expected server name.
    pub server_name: Option<String>,
}

/// Partially assembled OAuth2 credentials; complete once the issuer URL is set.
#[derive(Default)]
struct OAuthParts {
    uaa_url: Option<String>,
    client_id: Option<String>,
    client_secret: Option<SecretString>,
}

impl OAuthParts {
    fn from_config(oauth: Option<&OAuthConfig>) -> Self {
        oauth.map_or_else(Self::default, |oauth| Self {
            uaa_url: Some(oauth.uaa_url.clone()),
            client_id: Some(oauth.client_id.clone()),
            client_secret: Some(oauth.client_secret.clone()),
        })
    }

    fn build(self) -> Option<OAuthConfig> {
        let uaa_url = self.uaa_url.filter(|url| !url.trim().is_empty())?;
        Some(OAuthConfig {
            uaa_url,
            client_id: self.client_id.unwrap_or_default(),
            client_secret: self
                .client_secret
                .unwrap_or_else(|| SecretString::from(String::new())),
        })
    }
}

impl SuiteConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::Config {
            operation: format!("read {}", path.display()),
            cause: e.to_string(),
        })?;

        let file: ConfigFile = toml::from_str(&contents).map_err(|e| Error::Config {
            operation: format!("parse {}", path.display()),
            cause: e.to_string(),
        })?;

        Ok(Self::from_config_file(file))
    }

    /// Loads configuration from the default location.
    ///
    /// Reads `<config_dir>/lcats/config.toml` when it exists, otherwise
    /// returns defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Platform config file location.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        directories::BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("lcats").join("config.toml"))
    }

    /// Converts a `ConfigFile` to `SuiteConfig`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(addr) = file.log_cache_addr {
            config.log_cache_addr = addr;
        }
        if let Some(url) = file.log_cache_http_url {
            config.log_cache_http_url = url;
        }
        if let Some(addr) = file.log_emitter_addr {
            config.log_emitter_addr = addr;
        }
        if let Some(v) = file.skip_cert_verify {
            config.skip_cert_verify = v;
        }
        if let Some(v) = file.default_timeout {
            config.default_timeout = v;
        }
        if let Some(v) = file.wait_for_logs {
            config.wait_for_logs = v;
        }
        if let Some(v) = file.expected_per_source {
            config.expected_per_source = v;
        }
        if let Some(convergence) = file.convergence {
            if let Some(v) = convergence.eventually_timeout {
                config.eventually_timeout = v;
            }
            if let Some(v) = convergence.consistently_duration {
                config.consistently_duration = v;
            }
            if let Some(v) = convergence.polling_interval {
                config.polling_interval = v;
            }
        }
        if let Some(oauth) = file.oauth {
            config.oauth = OAuthParts {
                uaa_url: oauth.uaa_url,
                client_id: oauth.client_id,
                client_secret: oauth.client_secret.map(SecretString::from),
            }
            .build();
        }
        if let Some(tls) = file.tls {
            config.tls.ca_path = tls.ca_path;
            config.tls.cert_path = tls.cert_path;
            config.tls.key_path = tls.key_path;
            if let Some(name) = tls.server_name {
                config.tls.server_name = name;
            }
        }

        config
    }

    /// Applies overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unparseable value.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from `lookup`; empty values are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the variable that failed to parse.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("LOG_CACHE_ADDR") {
            self.log_cache_addr = v;
        }
        if let Some(v) = get("LOG_CACHE_CF_AUTH_PROXY_URL") {
            self.log_cache_http_url = v;
        }
        if let Some(v) = get("LOG_EMITTER_ADDR") {
            self.log_emitter_addr = v;
        }
        if let Some(v) = get("SKIP_CERT_VERIFY") {
            self.skip_cert_verify = parse_bool("SKIP_CERT_VERIFY", &v)?;
        }
        if let Some(v) = get("DEFAULT_TIMEOUT") {
            self.default_timeout = parse_duration("DEFAULT_TIMEOUT", &v)?;
        }
        if let Some(v) = get("WAIT_FOR_LOGS_TIMEOUT") {
            self.wait_for_logs = parse_duration("WAIT_FOR_LOGS_TIMEOUT", &v)?;
        }
        if let Some(v) = get("EXPECTED_PER_SOURCE") {
            self.expected_per_source = v.trim().parse().map_err(|e| Error::Config {
                operation: "parse EXPECTED_PER_SOURCE".to_string(),
                cause: format!("{e}"),
            })?;
        }
        if let Some(v) = get("EVENTUALLY_TIMEOUT") {
            self.eventually_timeout = parse_duration("EVENTUALLY_TIMEOUT", &v)?;
        }
        if let Some(v) = get("CONSISTENTLY_DURATION") {
            self.consistently_duration = parse_duration("CONSISTENTLY_DURATION", &v)?;
        }
        if let Some(v) = get("POLLING_INTERVAL") {
            self.polling_interval = parse_duration("POLLING_INTERVAL", &v)?;
        }

        let mut oauth = OAuthParts::from_config(self.oauth.as_ref());
        if let Some(v) = get("UAA_URL") {
            oauth.uaa_url = Some(v);
        }
        if let Some(v) = get("CLIENT_ID") {
            oauth.client_id = Some(v);
        }
        if let Some(v) = lookup("CLIENT_SECRET").filter(|v| !v.is_empty()) {
            oauth.client_secret = Some(SecretString::from(v));
        }
        self.oauth = oauth.build();

        if let Some(v) = get("CA_PATH") {
            self.tls.ca_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("CERT_PATH") {
            self.tls.cert_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("KEY_PATH") {
            self.tls.key_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("LOG_CACHE_SERVER_NAME") {
            self.tls.server_name = v;
        }

        Ok(self)
    }

    /// Sets the gRPC address.
    #[must_use]
    pub fn with_log_cache_addr(mut self, addr: impl Into<String>) -> Self {
        self.log_cache_addr = addr.into();
        self
    }

    /// Sets the HTTP gateway URL.
    #[must_use]
    pub fn with_log_cache_http_url(mut self, url: impl Into<String>) -> Self {
        self.log_cache_http_url = url.into();
        self
    }

    /// Sets the emitter address.
    #[must_use]
    pub fn with_log_emitter_addr(mut self, addr: impl Into<String>) -> Self {
        self.log_emitter_addr = addr.into();
        self
    }
}

fn parse_duration(key: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value.trim()).map_err(|e| Error::Config {
        operation: format!("parse {key}"),
        cause: e.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(Error::Config {
            operation: format!("parse {key}"),
            cause: format!("'{other}' is not a boolean"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SuiteConfig::default();
        assert_eq!(config.log_cache_addr, "localhost:8080");
        assert_eq!(config.tls.server_name, "log-cache");
        assert!(!config.tls.is_enabled());
        assert!(config.oauth.is_none());
        assert_eq!(config.polling_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_env_overrides() {
        let config = SuiteConfig::default()
            .apply_overrides(env(&[
                ("LOG_CACHE_ADDR", "log-cache.service:8080"),
                ("DEFAULT_TIMEOUT", "1m 30s"),
                ("WAIT_FOR_LOGS_TIMEOUT", "250ms"),
                ("SKIP_CERT_VERIFY", "TRUE"),
                ("UAA_URL", "https://uaa.example"),
                ("CLIENT_ID", "lcats"),
                ("CLIENT_SECRET", "hunter2"),
                ("CA_PATH", "/certs/ca.crt"),
                ("CERT_PATH", "/certs/client.crt"),
                ("KEY_PATH", "/certs/client.key"),
            ]))
            .unwrap();

        assert_eq!(config.log_cache_addr, "log-cache.service:8080");
        assert_eq!(config.default_timeout, Duration::from_secs(90));
        assert_eq!(config.wait_for_logs, Duration::from_millis(250));
        assert!(config.skip_cert_verify);
        assert!(config.tls.is_enabled());
        let oauth = config.oauth.unwrap();
        assert_eq!(oauth.client_id, "lcats");
        assert_eq!(oauth.client_secret.expose_secret(), "hunter2");
    }

    #[test]
    fn test_empty_env_values_are_ignored() {
        let config = SuiteConfig::default()
            .apply_overrides(env(&[("LOG_CACHE_ADDR", ""), ("UAA_URL", "  ")]))
            .unwrap();
        assert_eq!(config.log_cache_addr, "localhost:8080");
        assert!(config.oauth.is_none());
    }

    #[test]
    fn test_bad_duration_names_the_variable() {
        let err = SuiteConfig::default()
            .apply_overrides(env(&[("DEFAULT_TIMEOUT", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("DEFAULT_TIMEOUT"));
    }

    #[test]
    fn test_secret_is_not_debug_printed() {
        let config = SuiteConfig::default()
            .apply_overrides(env(&[("UAA_URL", "https://uaa"), ("CLIENT_SECRET", "hunter2")]))
            .unwrap();
        assert!(!format!("{config:?}").contains("hunter2"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
log_cache_addr = "10.0.0.5:8080"
default_timeout = "45s"
expected_per_source = 500

[convergence]
eventually_timeout = "2m"
polling_interval = "250ms"

[oauth]
uaa_url = "https://uaa.example"
client_id = "lcats"
client_secret = "from-file"

[tls]
server_name = "log-cache.internal"
"#
        )
        .unwrap();

        let config = SuiteConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.log_cache_addr, "10.0.0.5:8080");
        assert_eq!(config.default_timeout, Duration::from_secs(45));
        assert_eq!(config.expected_per_source, 500);
        assert_eq!(config.eventually_timeout, Duration::from_secs(120));
        assert_eq!(config.polling_interval, Duration::from_millis(250));
        assert_eq!(config.consistently_duration, Duration::from_secs(30));
        assert_eq!(config.tls.server_name, "log-cache.internal");
        assert_eq!(
            config.oauth.unwrap().client_secret.expose_secret(),
            "from-file"
        );
    }

    #[test]
    fn test_env_overrides_file_secret() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[oauth]\nuaa_url = \"https://uaa\"\nclient_secret = \"from-file\""
        )
        .unwrap();
        let config = SuiteConfig::load_from_file(file.path())
            .unwrap()
            .apply_overrides(env(&[("CLIENT_SECRET", "from-env")]))
            .unwrap();
        assert_eq!(
            config.oauth.unwrap().client_secret.expose_secret(),
            "from-env"
        );
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "log_cach_addr = \"typo\"").unwrap();
        assert!(matches!(
            SuiteConfig::load_from_file(file.path()),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = SuiteConfig::load_from_file(Path::new("/nonexistent/lcats.toml")).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}

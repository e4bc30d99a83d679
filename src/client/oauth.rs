//! OAuth2 client-credentials tokens for the HTTP gateway.

use crate::config::OAuthConfig;
use crate::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Tokens are refreshed this long before the issuer says they expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(30);

/// Lifetime assumed when the issuer omits `expires_in`.
const DEFAULT_LIFETIME: Duration = Duration::from_secs(300);

/// Longest lifetime trusted from the issuer; anything above is clamped.
const MAX_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    token: Arc<SecretString>,
    refresh_at: Instant,
}

/// Fetches and caches bearer tokens from a UAA-style `/oauth/token` endpoint.
///
/// Concurrent callers share one in-flight fetch; the cache lock is held for
/// the duration of the exchange.
pub struct TokenSource {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: SecretString,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenSource {
    /// Creates a token source that issues requests through `http`.
    #[must_use]
    pub fn new(http: reqwest::Client, config: &OAuthConfig) -> Self {
        Self {
            http,
            token_url: format!("{}/oauth/token", config.uaa_url.trim_end_matches('/')),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            cached: Mutex::new(None),
        }
    }

    /// Returns a valid access token, fetching a new one when the cached token
    /// is missing or about to expire.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the token endpoint is unreachable,
    /// rejects the credentials, or answers with an unreadable body.
    pub async fn token(&self) -> Result<Arc<SecretString>> {
        let mut cached = self.cached.lock().await;
        if let Some(entry) = cached.as_ref()
            && Instant::now() < entry.refresh_at
        {
            return Ok(Arc::clone(&entry.token));
        }

        let fresh = self.fetch().await?;
        let token = Arc::clone(&fresh.token);
        *cached = Some(fresh);
        drop(cached);
        Ok(token)
    }

    /// Drops the cached token so the next call fetches a new one.
    pub async fn invalidate(&self) {
        self.cached.lock().await.take();
    }

    async fn fetch(&self) -> Result<CachedToken> {
        let response = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(self.client_secret.expose_secret()))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| Error::transport("fetch oauth token", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::transport(
                "fetch oauth token",
                format!("token endpoint returned {status}"),
            ));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::transport("decode oauth token", e))?;
        let lifetime = token_lifetime(body.expires_in);

        tracing::debug!(
            lifetime_secs = lifetime.as_secs(),
            "Fetched OAuth2 access token"
        );

        Ok(CachedToken {
            token: Arc::new(SecretString::from(body.access_token)),
            refresh_at: refresh_at(Instant::now(), lifetime),
        })
    }
}

fn token_lifetime(expires_in: Option<u64>) -> Duration {
    expires_in
        .map_or(DEFAULT_LIFETIME, Duration::from_secs)
        .min(MAX_LIFETIME)
}

fn refresh_at(now: Instant, lifetime: Duration) -> Instant {
    let early = lifetime.saturating_sub(REFRESH_MARGIN);
    now.checked_add(early).unwrap_or(now)
}

//! Access credential cache.
//!
//! Holds the single upstream access token shared by every request in the
//! process. The credential is swapped atomically on refresh and never
//! mutated in place; refreshes are serialised so a burst of callers hitting
//! an expired token produces one credential exchange.
//!
//! The configured TTL is deliberately shorter than the real token lifetime
//! (50 minutes against 60 by default) so a credential handed to a caller
//! does not expire while that caller's request is in flight.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use serde::Deserialize;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use url::Url;

use crate::error::UpstreamError;

/// Default credential TTL.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(50 * 60);

/// An upstream access token and the instant it stops being handed out.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessCredential {
    value: String,
    expires_at: OffsetDateTime,
}

impl AccessCredential {
    /// Creates a credential.
    #[must_use]
    pub fn new(value: impl Into<String>, expires_at: OffsetDateTime) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    /// The bearer token.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// When the cache stops serving this credential.
    #[must_use]
    pub fn expires_at(&self) -> OffsetDateTime {
        self.expires_at
    }

    /// `true` while the credential may be served.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        OffsetDateTime::now_utc() < self.expires_at
    }
}

impl fmt::Debug for AccessCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessCredential")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Credential exchange settings.
#[derive(Clone)]
pub struct TokenCacheConfig {
    /// OAuth token endpoint.
    pub token_url: Url,
    /// Application client ID.
    pub client_id: String,
    /// Application client secret.
    pub client_secret: String,
    /// Long-lived refresh token for the site owner's account.
    pub refresh_token: String,
    /// Maximum time a credential is served.
    pub ttl: Duration,
}

impl fmt::Debug for TokenCacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCacheConfig")
            .field("token_url", &self.token_url.as_str())
            .field("client_id", &self.client_id)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// Token endpoint response.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TokenResponse {
    Granted {
        access_token: String,
        expires_in: u64,
    },
    Rejected {
        error: String,
        #[serde(default)]
        error_description: Option<String>,
    },
}

/// Process-wide access credential cache.
pub struct TokenCache {
    http: reqwest::Client,
    config: TokenCacheConfig,
    current: ArcSwapOption<AccessCredential>,
    refresh_lock: Mutex<()>,
}

impl TokenCache {
    /// Creates an empty cache; the first call to
    /// [`get_access_token`](Self::get_access_token) performs the exchange.
    #[must_use]
    pub fn new(http: reqwest::Client, config: TokenCacheConfig) -> Self {
        Self {
            http,
            config,
            current: ArcSwapOption::empty(),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Returns the cached credential, refreshing it if absent or expired.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::Auth`] if the credential exchange fails. A
    /// stale credential is never returned.
    pub async fn get_access_token(&self) -> Result<Arc<AccessCredential>, UpstreamError> {
        if let Some(cred) = self.valid_current() {
            return Ok(cred);
        }

        let _guard = self.refresh_lock.lock().await;
        // Another caller may have refreshed while we waited.
        if let Some(cred) = self.valid_current() {
            tracing::trace!("credential refreshed by concurrent caller");
            return Ok(cred);
        }
        self.refresh_locked().await
    }

    /// Forces a credential exchange, bypassing the cached value.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::Auth`] if the credential exchange fails.
    pub async fn get_fresh_access_token(&self) -> Result<Arc<AccessCredential>, UpstreamError> {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked().await
    }

    /// Drops the cached credential so the next call exchanges a new one.
    pub fn invalidate(&self) {
        self.current.store(None);
        tracing::info!("access credential invalidated");
    }

    /// The cached credential, valid or not.
    #[must_use]
    pub fn current(&self) -> Option<Arc<AccessCredential>> {
        self.current.load_full()
    }

    fn valid_current(&self) -> Option<Arc<AccessCredential>> {
        self.current.load_full().filter(|c| c.is_valid())
    }

    async fn refresh_locked(&self) -> Result<Arc<AccessCredential>, UpstreamError> {
        match self.exchange().await {
            Ok(cred) => {
                let cred = Arc::new(cred);
                self.current.store(Some(Arc::clone(&cred)));
                tracing::debug!(expires_at = %cred.expires_at, "access credential refreshed");
                Ok(cred)
            }
            Err(err) => {
                self.current.store(None);
                tracing::error!(error = %err, "access credential refresh failed");
                Err(err)
            }
        }
    }

    async fn exchange(&self) -> Result<AccessCredential, UpstreamError> {
        if self.config.refresh_token.is_empty() || self.config.client_id.is_empty() {
            return Err(UpstreamError::auth("upstream credentials are not configured"));
        }

        let response = self
            .http
            .post(self.config.token_url.clone())
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", self.config.refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| UpstreamError::auth(format!("credential exchange failed: {e}")))?;

        let status = response.status();
        let body: TokenResponse = response.json().await.map_err(|e| {
            UpstreamError::auth(format!("unreadable token response (status {status}): {e}"))
        })?;

        match body {
            TokenResponse::Granted {
                access_token,
                expires_in,
            } if status.is_success() => {
                Ok(AccessCredential::new(
                    access_token,
                    expiry_after(self.config.ttl, expires_in),
                ))
            }
            TokenResponse::Rejected {
                error,
                error_description,
            } => Err(UpstreamError::auth(match error_description {
                Some(desc) => format!("{error}: {desc}"),
                None => error,
            })),
            TokenResponse::Granted { .. } => Err(UpstreamError::auth(format!(
                "token endpoint returned status {status}"
            ))),
        }
    }
}

/// Expiry for a credential granted now: the shorter of the configured TTL
/// and the upstream's `expires_in`, saturating instead of overflowing.
fn expiry_after(configured: Duration, expires_in: u64) -> OffsetDateTime {
    let ttl = configured.min(Duration::from_secs(expires_in));
    let ttl = time::Duration::try_from(ttl).unwrap_or(time::Duration::MAX);
    OffsetDateTime::now_utc().saturating_add(ttl)
}

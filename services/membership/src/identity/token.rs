//! Service-account bearer tokens for the identity provider's admin API.
//!
//! # Purpose
//! Every gateway call needs a bearer credential obtained through an OAuth2
//! token exchange. [`AccessTokenCache`] performs that exchange, caches the token
//! until shortly before it expires, and refreshes it on demand.
//!
//! # Key invariants
//! - At most one refresh runs at a time; concurrent callers wait on the same
//!   mutex and reuse the fresh token.
//! - A token is reused until its refresh point: its lifetime less the refresh
//!   skew, where the skew never exceeds half the lifetime.
//! - A refresh is retried a bounded number of times, then surfaced as
//!   [`GatewayError::TokenUnavailable`]. Nothing retries indefinitely inline.
//!
//! # Security notes
//! - Client secrets and access tokens are never logged.
use crate::identity::gateway::GatewayError;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const DEFAULT_EXPIRES_IN_SECS: u64 = 60;
const MAX_EXPIRES_IN_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub grant_type: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TokenPolicy {
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    /// Tokens are treated as expired this long before their real expiry,
    /// capped at half the token's lifetime.
    pub refresh_skew: Duration,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff: Duration::from_millis(200),
            refresh_skew: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

#[derive(Clone)]
pub struct AccessTokenCache {
    client: reqwest::Client,
    credentials: ClientCredentials,
    policy: TokenPolicy,
    cached: Arc<Mutex<Option<CachedToken>>>,
}

impl AccessTokenCache {
    pub fn new(client: reqwest::Client, credentials: ClientCredentials, policy: TokenPolicy) -> Self {
        Self {
            client,
            credentials,
            policy,
            cached: Arc::new(Mutex::new(None)),
        }
    }

    /// Return a valid bearer token, refreshing it when missing or near expiry.
    pub async fn bearer(&self) -> Result<String, GatewayError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref()
            && Instant::now() < token.refresh_at
        {
            return Ok(token.value.clone());
        }

        let token = self.fetch_with_retry().await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    /// Drop the cached token, e.g. after the provider rejected it with 401.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    async fn fetch_with_retry(&self) -> Result<CachedToken, GatewayError> {
        let attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.fetch().await {
                Ok(token) => {
                    metrics::counter!("identity_token_fetch_total", "outcome" => "ok").increment(1);
                    return Ok(token);
                }
                Err(err) => {
                    tracing::warn!(attempt, attempts, error = %err, "access token request failed");
                    last_error = err;
                    if attempt < attempts {
                        tokio::time::sleep(self.policy.retry_backoff).await;
                    }
                }
            }
        }
        metrics::counter!("identity_token_fetch_total", "outcome" => "error").increment(1);
        Err(GatewayError::TokenUnavailable(last_error))
    }

    async fn fetch(&self) -> Result<CachedToken, String> {
        let scope = self.credentials.scopes.join(" ");
        let mut form = vec![
            ("grant_type", self.credentials.grant_type.as_str()),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
        ];
        if !scope.is_empty() {
            form.push(("scope", scope.as_str()));
        }
        let response = self
            .client
            .post(&self.credentials.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|err| err.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("token endpoint returned {status}"));
        }
        let body: TokenResponse = response.json().await.map_err(|err| err.to_string())?;
        if body.access_token.is_empty() {
            return Err("token endpoint returned an empty access token".to_string());
        }
        let lifetime = Duration::from_secs(
            body.expires_in
                .unwrap_or(DEFAULT_EXPIRES_IN_SECS)
                .min(MAX_EXPIRES_IN_SECS),
        );
        let now = Instant::now();
        Ok(CachedToken {
            value: body.access_token,
            refresh_at: now
                .checked_add(refresh_after(lifetime, self.policy.refresh_skew))
                .unwrap_or(now),
        })
    }
}

fn refresh_after(lifetime: Duration, skew: Duration) -> Duration {
    lifetime.saturating_sub(skew.min(lifetime / 2))
}

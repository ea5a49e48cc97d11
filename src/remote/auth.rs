//! Remote store authentication
//!
//! [`AuthSession`] caches the signed-in credential and refreshes it before
//! it gets too close to expiry. Every remote call goes through
//! [`AuthSession::access_token`].

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::RemoteError;

/// Refresh credentials this many seconds before they expire
pub const DEFAULT_REFRESH_WINDOW_SECS: i64 = 300;

/// OAuth credential for the remote store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Whether the credential expires within `window` of `now`
    pub fn expires_within(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.expires_at - now <= window
    }
}

/// Exchanges a refresh token for a fresh credential
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<Credential, RemoteError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    refresh_token: Option<String>,
}

/// Refresh-token grant against an OAuth 2.0 token endpoint
pub struct OAuthRefresher {
    client: Client,
    token_url: String,
    client_id: String,
    clock: Arc<dyn Clock>,
}

impl OAuthRefresher {
    pub fn new(client: Client, token_url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            client,
            token_url: token_url.into(),
            client_id: client_id.into(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl TokenRefresher for OAuthRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<Credential, RemoteError> {
        debug!(token_url = %self.token_url, "Refreshing access token");
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.client_id.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(RemoteError::Server { status, message });
        }

        let token: TokenResponse = response.json().await?;
        Ok(Credential {
            access_token: token.access_token,
            // Providers usually omit the refresh token on refresh
            refresh_token: token.refresh_token.or_else(|| Some(refresh_token.to_string())),
            expires_at: self.clock.now() + Duration::seconds(token.expires_in),
        })
    }
}

/// Signed-in state shared by remote clients
pub struct AuthSession {
    credential: Mutex<Option<Credential>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    clock: Arc<dyn Clock>,
    refresh_window: Duration,
}

impl AuthSession {
    /// Create a signed-out session
    pub fn new(refresher: Option<Arc<dyn TokenRefresher>>) -> Self {
        Self {
            credential: Mutex::new(None),
            refresher,
            clock: Arc::new(SystemClock),
            refresh_window: Duration::seconds(DEFAULT_REFRESH_WINDOW_SECS),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_refresh_window(mut self, window: Duration) -> Self {
        self.refresh_window = window;
        self
    }

    pub async fn sign_in(&self, credential: Credential) {
        info!(expires_at = %credential.expires_at, "Signed in to remote store");
        *self.credential.lock().await = Some(credential);
    }

    pub async fn sign_out(&self) {
        info!("Signed out of remote store");
        *self.credential.lock().await = None;
    }

    pub async fn is_signed_in(&self) -> bool {
        self.credential.lock().await.is_some()
    }

    /// Current access token, refreshed first if it is inside the refresh window
    pub async fn access_token(&self) -> Result<String, RemoteError> {
        let mut guard = self.credential.lock().await;
        let credential = guard.as_ref().ok_or(RemoteError::NotSignedIn)?;

        let now = self.clock.now();
        if !credential.expires_within(now, self.refresh_window) {
            return Ok(credential.access_token.clone());
        }

        let still_valid = credential.expires_at > now;
        let (refresher, refresh_token) = match (&self.refresher, &credential.refresh_token) {
            (Some(refresher), Some(token)) => (refresher.clone(), token.clone()),
            _ if still_valid => return Ok(credential.access_token.clone()),
            _ => return Err(RemoteError::NotSignedIn),
        };

        match refresher.refresh(&refresh_token).await {
            Ok(fresh) => {
                debug!(expires_at = %fresh.expires_at, "Access token refreshed");
                let token = fresh.access_token.clone();
                *guard = Some(fresh);
                Ok(token)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                Err(RemoteError::NotSignedIn)
            }
        }
    }
}

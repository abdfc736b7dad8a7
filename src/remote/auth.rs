//! Bearer-token credential handling.
//!
//! Credentials are loaded from a JSON file holding an OAuth client id/secret
//! and a long-lived refresh token. The short-lived access token is refreshed
//! proactively on expiry and reactively when the service answers 401.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use snafu::ResultExt;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{
    AuthError, ParseCredentialsSnafu, ReadCredentialsSnafu, RefreshTransportSnafu,
};

const DEFAULT_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// Refresh slightly before the reported expiry to absorb clock skew.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Contents of the credentials file.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    #[serde(default = "default_token_endpoint")]
    pub token_endpoint: String,
}

fn default_token_endpoint() -> String {
    DEFAULT_TOKEN_ENDPOINT.to_string()
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_expired(&self) -> bool {
        Utc::now() + Duration::seconds(EXPIRY_MARGIN_SECS) >= self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

/// Manages the access token for one set of credentials.
pub struct TokenManager {
    credentials: Credentials,
    http: reqwest::Client,
    token: RwLock<Option<AccessToken>>,
}

impl TokenManager {
    /// Load credentials from a JSON file. A missing file is fatal.
    pub fn from_file(path: &Path) -> Result<Self, AuthError> {
        if !path.exists() {
            return Err(AuthError::MissingCredentials {
                path: path.to_path_buf(),
            });
        }
        let contents = std::fs::read_to_string(path).context(ReadCredentialsSnafu)?;
        let credentials: Credentials =
            serde_json::from_str(&contents).context(ParseCredentialsSnafu)?;
        Ok(Self::new(credentials))
    }

    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            http: reqwest::Client::new(),
            token: RwLock::new(None),
        }
    }

    /// Current bearer token, refreshing first if absent or near expiry.
    pub async fn bearer(&self) -> Result<String, AuthError> {
        {
            let token = self.token.read().await;
            if let Some(token) = token.as_ref() {
                if !token.is_expired() {
                    return Ok(token.value.clone());
                }
            }
        }
        self.refresh().await
    }

    /// Exchange the refresh token for a fresh access token.
    pub async fn refresh(&self) -> Result<String, AuthError> {
        debug!("Refreshing access token");

        let response = self
            .http
            .post(&self.credentials.token_endpoint)
            .form(&[
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("refresh_token", self.credentials.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .context(RefreshTransportSnafu)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AuthError::Refresh {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: TokenResponse = response.json().await.context(RefreshTransportSnafu)?;
        let token = AccessToken {
            value: parsed.access_token,
            expires_at: Utc::now() + Duration::seconds(parsed.expires_in),
        };

        let value = token.value.clone();
        *self.token.write().await = Some(token);
        info!("Access token refreshed");
        Ok(value)
    }
}

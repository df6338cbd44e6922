//! Strava OAuth2 authorization code flow.
//!
//! Builds the consent link, exchanges the returned code for a token set and
//! refreshes expired tokens.

use std::env;

use log::{debug, info};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};

use crate::error::{ColHunterError, Result};

const AUTHORIZE_URL: &str = "https://www.strava.com/oauth/authorize";
const TOKEN_URL: &str = "https://www.strava.com/oauth/token";

/// Scopes needed to list private activities.
pub const DEFAULT_SCOPE: &str = "read,activity:read";

/// Refresh this many seconds before the token actually expires.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Tokens issued by the authorization server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: String,
    /// Expiry as a Unix timestamp in seconds
    pub expires_at: i64,
}

impl TokenSet {
    /// Whether the access token is expired or about to be at `now`.
    pub fn is_expired(&self, now: i64) -> bool {
        now + EXPIRY_MARGIN_SECS >= self.expires_at
    }

    /// [`is_expired`](Self::is_expired) against the system clock.
    pub fn is_expired_now(&self) -> bool {
        self.is_expired(chrono::Utc::now().timestamp())
    }
}

/// Application credentials registered with Strava.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StravaCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl StravaCredentials {
    /// Read `STRAVA_CLIENT_ID`, `STRAVA_CLIENT_SECRET` and
    /// `STRAVA_REDIRECT_URI`, or their lower-case forms.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            client_id: env_var("STRAVA_CLIENT_ID")?,
            client_secret: env_var("STRAVA_CLIENT_SECRET")?,
            redirect_uri: env_var("STRAVA_REDIRECT_URI")?,
        })
    }
}

fn env_var(name: &str) -> Result<String> {
    env::var(name)
        .or_else(|_| env::var(name.to_lowercase()))
        .map_err(|_| ColHunterError::ConfigError {
            message: format!("{} is not set", name),
        })
}

/// OAuth client for one registered application.
pub struct StravaAuth {
    client: Client,
    credentials: StravaCredentials,
}

impl StravaAuth {
    pub fn new(credentials: StravaCredentials) -> Self {
        Self {
            client: Client::new(),
            credentials,
        }
    }

    pub fn credentials(&self) -> &StravaCredentials {
        &self.credentials
    }

    /// Consent link the rider opens to grant access.
    pub fn authorization_url(&self) -> Result<String> {
        let url = Url::parse_with_params(
            AUTHORIZE_URL,
            &[
                ("client_id", self.credentials.client_id.as_str()),
                ("redirect_uri", self.credentials.redirect_uri.as_str()),
                ("response_type", "code"),
                ("approval_prompt", "auto"),
                ("scope", DEFAULT_SCOPE),
            ],
        )
        .map_err(|e| ColHunterError::Internal {
            message: format!("Failed to build authorization URL: {}", e),
        })?;
        Ok(url.to_string())
    }

    /// Exchange the code from the redirect for a token set.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenSet> {
        debug!("[StravaAuth] Exchanging authorization code");
        let tokens = self
            .request_tokens(&[
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
            ])
            .await?;
        info!("[StravaAuth] Authorized, token expires at {}", tokens.expires_at);
        Ok(tokens)
    }

    /// Trade a refresh token for a new token set.
    pub async fn refresh(&self, tokens: &TokenSet) -> Result<TokenSet> {
        debug!("[StravaAuth] Refreshing access token");
        let refreshed = self
            .request_tokens(&[
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("refresh_token", tokens.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .await?;
        info!(
            "[StravaAuth] Token refreshed, expires at {}",
            refreshed.expires_at
        );
        Ok(refreshed)
    }

    async fn request_tokens(&self, form: &[(&str, &str)]) -> Result<TokenSet> {
        let response = self
            .client
            .post(TOKEN_URL)
            .form(form)
            .send()
            .await
            .map_err(|e| ColHunterError::AuthDenied {
                message: format!("Token request failed: {}", e),
            })?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            return Err(ColHunterError::AuthDenied {
                message: format!("HTTP {}: {}", status, body),
            });
        }
        if !status.is_success() {
            return Err(ColHunterError::AuthDenied {
                message: format!("HTTP {}", status),
            });
        }

        response
            .json::<TokenSet>()
            .await
            .map_err(|e| ColHunterError::AuthDenied {
                message: format!("Malformed token response: {}", e),
            })
    }
}

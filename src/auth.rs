use log::{debug, warn};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::token::{id_to_string, TokenState};

/// Username and password for the iQua account.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Token envelope returned by both the login and refresh endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub user_id: Option<Value>,
}

impl From<TokenResponse> for TokenState {
    fn from(response: TokenResponse) -> Self {
        TokenState::from_tokens(
            response.access_token,
            response.refresh_token,
            response.user_id.as_ref().and_then(id_to_string),
        )
    }
}

/// Performs login and refresh against the auth endpoints.
#[derive(Debug, Clone)]
pub struct Authenticator {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl Authenticator {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Exchange credentials for a fresh token set.
    pub async fn login(&self, credentials: &Credentials) -> Result<TokenState> {
        debug!("Logging in user: {}", credentials.username);

        let request = LoginRequest {
            email: &credentials.username,
            password: &credentials.password,
        };

        let response = self
            .client
            .post(self.endpoint("auth/login"))
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        let response_text = response.text().await?;

        if status == StatusCode::UNAUTHORIZED {
            warn!("Login rejected for user: {}", credentials.username);
            return Err(Error::Auth(format!("invalid credentials ({})", response_text)));
        }
        if status != StatusCode::OK {
            warn!("Login failed with status: {}", status);
            return Err(Error::Auth(format!(
                "login failed: {} {}",
                status.as_u16(),
                response_text
            )));
        }

        let tokens = parse_token_response(&response_text)?;
        debug!(
            "Login successful for user: {} (expiry known: {})",
            credentials.username,
            tokens.expires_at.is_some()
        );
        Ok(tokens)
    }

    /// Mint a new token set from a refresh token. Without a refresh token this
    /// fails before touching the network.
    pub async fn refresh(&self, refresh_token: Option<&str>) -> Result<TokenState> {
        let refresh_token = refresh_token
            .ok_or_else(|| Error::Auth("no refresh token available".to_string()))?;

        debug!("Refreshing access token");

        let response = self
            .client
            .post(self.endpoint("auth/refresh"))
            .json(&RefreshRequest { refresh_token })
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        let response_text = response.text().await?;

        if status != StatusCode::OK {
            warn!("Token refresh failed with status: {}", status);
            return Err(Error::Auth(format!(
                "refresh failed: {} {}",
                status.as_u16(),
                response_text
            )));
        }

        let tokens = parse_token_response(&response_text)?;
        debug!("Token refresh successful");
        Ok(tokens)
    }
}

fn parse_token_response(body: &str) -> Result<TokenState> {
    let response: TokenResponse = serde_json::from_str(body)?;
    Ok(response.into())
}

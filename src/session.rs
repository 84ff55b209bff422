//! Gatekeeping of every outbound call behind a usable access token.
//!
//! A token moves between three states: `Absent -> Valid` on login,
//! `Valid -> Expired` when time passes its derived expiry (or the server
//! answers 401), and `Expired -> Valid` on refresh, or login when the refresh
//! fails. There is no terminal state; a session keeps working across any
//! number of auth cycles.

use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::Mutex;

use crate::auth::{Authenticator, Credentials};
use crate::error::Result;
use crate::token::{TokenState, TokenStatus};

pub struct Session {
    authenticator: Authenticator,
    credentials: Credentials,
    // Held across check-and-authenticate so concurrent callers share one
    // login/refresh instead of racing.
    state: Mutex<TokenState>,
}

impl Session {
    pub fn new(authenticator: Authenticator, credentials: Credentials) -> Self {
        Self {
            authenticator,
            credentials,
            state: Mutex::new(TokenState::default()),
        }
    }

    /// Make sure a usable access token is held and return it.
    pub async fn ensure_valid(&self) -> Result<Option<String>> {
        let mut state = self.state.lock().await;

        match state.status_at(Utc::now().timestamp()) {
            TokenStatus::Valid => {}
            TokenStatus::Absent => {
                debug!("No access token held, authenticating");
                self.reauthenticate(&mut state).await?;
            }
            TokenStatus::Expired => {
                debug!("Access token past its derived expiry, renewing");
                self.reauthenticate(&mut state).await?;
            }
        }

        Ok(state.access_token.clone())
    }

    /// Recover after the server rejected `rejected` with a 401.
    ///
    /// Returns whether the request should be retried. Nothing is attempted
    /// when no refresh token is held.
    pub async fn recover(&self, rejected: Option<&str>) -> Result<bool> {
        let mut state = self.state.lock().await;

        if !state.has_refresh_token() {
            debug!("401 received and no refresh token held, not retrying");
            return Ok(false);
        }

        if state.access_token.as_deref() != rejected {
            debug!("Access token already renewed by another request");
            return Ok(true);
        }

        info!("Access token rejected, renewing before retry");
        self.reauthenticate(&mut state).await?;
        Ok(true)
    }

    /// Refresh if a refresh token is held, falling back to login on any
    /// refresh failure. A login failure is returned as-is.
    async fn reauthenticate(&self, state: &mut TokenState) -> Result<()> {
        if state.has_refresh_token() {
            let refreshed = self
                .authenticator
                .refresh(state.refresh_token.as_deref())
                .await;
            match refreshed {
                Ok(next) => {
                    *state = merge_refreshed(state, next);
                    return Ok(());
                }
                // Network errors land here too and also trigger a full login.
                Err(e) => warn!("Token refresh failed, logging in again: {}", e),
            }
        }

        *state = self.authenticator.login(&self.credentials).await?;
        info!("Logged in as {}", self.credentials.username);
        Ok(())
    }

    /// Current bearer token, without any validity check.
    pub async fn bearer(&self) -> Option<String> {
        self.state.lock().await.access_token.clone()
    }

    /// Disconnected copy of the current token state.
    pub async fn snapshot(&self) -> TokenState {
        self.state.lock().await.clone()
    }

    pub async fn replace(&self, tokens: TokenState) {
        *self.state.lock().await = tokens;
    }
}

/// Refresh responses may omit the refresh token and user id; keep the ones we
/// already have in that case.
fn merge_refreshed(current: &TokenState, next: TokenState) -> TokenState {
    TokenState {
        refresh_token: next.refresh_token.or_else(|| current.refresh_token.clone()),
        user_id: next.user_id.or_else(|| current.user_id.clone()),
        ..next
    }
}

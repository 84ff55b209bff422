use chrono::Utc;
use jsonwebtoken::{decode, DecodingKey, Validation};
use log::debug;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;

use crate::error::Result;

/// Seconds subtracted from a token's `exp` claim so it is renewed early.
pub const EXPIRY_SAFETY_MARGIN_SECS: i64 = 60;

/// Key under which the derived expiry is persisted.
const EXPIRES_AT_KEY: &str = "_access_expires_at";

#[derive(Debug, Deserialize)]
struct ExpiryClaim {
    exp: Option<Value>,
}

/// Where a token stands right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    /// No access token is held.
    Absent,
    /// An access token is held and is either before its derived expiry or has
    /// no known expiry.
    Valid,
    /// An access token is held but the current time is at or past its derived
    /// expiry.
    Expired,
}

/// Access token, refresh token, user id and derived expiry of one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenState {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user_id: Option<String>,
    /// Epoch seconds: the access token's `exp` minus the safety margin.
    pub expires_at: Option<i64>,
}

impl TokenState {
    /// Build a state from freshly issued tokens, deriving the expiry from the
    /// access token.
    pub fn from_tokens(
        access_token: Option<String>,
        refresh_token: Option<String>,
        user_id: Option<String>,
    ) -> Self {
        let expires_at = access_token.as_deref().and_then(derive_expiry);
        Self {
            access_token,
            refresh_token,
            user_id,
            expires_at,
        }
    }

    pub fn status(&self) -> TokenStatus {
        self.status_at(Utc::now().timestamp())
    }

    pub fn status_at(&self, now: i64) -> TokenStatus {
        if self.access_token.is_none() {
            return TokenStatus::Absent;
        }
        match self.expires_at {
            Some(expires_at) if now >= expires_at => TokenStatus::Expired,
            _ => TokenStatus::Valid,
        }
    }

    /// A missing access token counts as expired; an unknown expiry never does.
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.status_at(now) != TokenStatus::Valid
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.is_some()
    }

    /// Serialize into the blob format used for persisted token state.
    pub fn serialize(&self) -> Value {
        json!({
            "access_token": self.access_token,
            "refresh_token": self.refresh_token,
            "user_id": self.user_id,
            EXPIRES_AT_KEY: self.expires_at,
        })
    }

    /// Overwrite every field from a blob. Missing or mistyped keys become `None`.
    pub fn restore(&mut self, blob: &Value) {
        let text = |key: &str| blob.get(key).and_then(Value::as_str).map(str::to_string);

        self.access_token = text("access_token");
        self.refresh_token = text("refresh_token");
        self.user_id = blob.get("user_id").and_then(id_to_string);
        self.expires_at = blob
            .get(EXPIRES_AT_KEY)
            .or_else(|| blob.get("expires_at"))
            .and_then(Value::as_i64);
    }

    pub fn from_blob(blob: &Value) -> Self {
        let mut state = Self::default();
        state.restore(blob);
        state
    }

    /// Write the serialized state to `path` as JSON.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.serialize())?;
        fs::write(path, content)?;
        debug!("Saved token state to {}", path.display());
        Ok(())
    }

    /// Read state from `path`. A missing file yields `Ok(None)`.
    pub fn load_from_file(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            debug!("No token file at {}", path.display());
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        let blob: Value = serde_json::from_str(&content)?;
        debug!("Loaded token state from {}", path.display());
        Ok(Some(Self::from_blob(&blob)))
    }
}

/// Best-effort expiry hint for an access token.
///
/// The payload is decoded without checking the signature. The result is only
/// used to decide when to renew; it never grants anything.
pub fn derive_expiry(token: &str) -> Option<i64> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = match decode::<ExpiryClaim>(token, &DecodingKey::from_secret(&[]), &validation) {
        Ok(data) => data,
        Err(e) => {
            debug!("Access token payload not decodable, expiry unknown: {}", e);
            return None;
        }
    };

    let exp = match data.claims.exp? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    exp.checked_sub(EXPIRY_SAFETY_MARGIN_SECS)
}

/// Ids arrive as strings from most endpoints but some return numbers.
pub(crate) fn id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

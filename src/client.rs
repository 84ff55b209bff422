use log::{debug, error, info};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::path::Path;
use tokio::sync::Mutex;

use crate::auth::{Authenticator, Credentials};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::models::{
    Device, DeviceCommand, DeviceDetail, DeviceDetailResponse, DevicesResponse, FlowAndSalt,
    RegenerationAction, SoftenerData, ValveAction,
};
use crate::session::Session;
use crate::token::TokenState;

/// Status and parsed JSON body of a successful call. An empty body parses as
/// `null`.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

/// Client for one iQua softener, identified by its serial number.
pub struct IquaClient {
    client: reqwest::Client,
    config: ClientConfig,
    session: Session,
    device_serial_number: String,
    // Resolved once, never invalidated.
    device_id: Mutex<Option<String>>,
}

impl IquaClient {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        device_serial_number: impl Into<String>,
    ) -> Self {
        Self::with_config(
            Credentials::new(username, password),
            device_serial_number,
            ClientConfig::default(),
        )
    }

    pub fn with_config(
        credentials: Credentials,
        device_serial_number: impl Into<String>,
        config: ClientConfig,
    ) -> Self {
        // One pooled client shared by the auth calls and the API calls
        let client = reqwest::Client::new();
        let authenticator =
            Authenticator::new(client.clone(), config.api_base_url.clone(), config.auth_timeout);

        Self {
            client,
            session: Session::new(authenticator, credentials),
            config,
            device_serial_number: device_serial_number.into(),
            device_id: Mutex::new(None),
        }
    }

    pub fn device_serial_number(&self) -> &str {
        &self.device_serial_number
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Join relative paths onto the base URL; absolute URLs pass through.
    pub fn resolve_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!(
            "{}/{}",
            self.config.api_base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn get_headers(bearer: Option<&str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = bearer {
            let auth_value = format!("Bearer {}", token);
            let value = HeaderValue::from_str(&auth_value).map_err(|_| {
                Error::Auth("access token is not a valid header value".to_string())
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        Ok(headers)
    }

    async fn send(
        &self,
        method: &Method,
        url: &str,
        body: Option<&Value>,
        bearer: Option<&str>,
    ) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .request(method.clone(), url)
            .headers(Self::get_headers(bearer)?)
            .timeout(self.config.request_timeout);
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    /// Issue an authenticated call.
    ///
    /// A 401 is answered with one refresh (or login, if the refresh fails) and
    /// a single retry, provided a refresh token is held. Any final status other
    /// than 200 becomes [`Error::Http`].
    pub async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<ApiResponse> {
        let bearer = self.session.ensure_valid().await?;
        let url = self.resolve_url(path);

        debug!("{} {}", method, url);
        let mut response = self.send(&method, &url, body, bearer.as_deref()).await?;

        if response.status() == StatusCode::UNAUTHORIZED
            && self.session.recover(bearer.as_deref()).await?
        {
            let retry_bearer = self.session.bearer().await;
            debug!("Retrying {} {} after re-authentication", method, url);
            response = self
                .send(&method, &url, body, retry_bearer.as_deref())
                .await?;
        }

        let status = response.status();
        let response_text = response.text().await?;

        if status != StatusCode::OK {
            error!("{} {} failed with status {}", method, url, status);
            return Err(Error::Http {
                status: status.as_u16(),
                body: response_text,
            });
        }

        let body = if response_text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&response_text)?
        };

        Ok(ApiResponse {
            status: status.as_u16(),
            body,
        })
    }

    /// List every device on the account.
    pub async fn get_devices(&self) -> Result<Vec<Device>> {
        debug!("Fetching device list");

        let response = self.execute(Method::GET, "/devices", None).await?;
        let devices = match response.body {
            Value::Null => Vec::new(),
            body => serde_json::from_value::<DevicesResponse>(body)?.data,
        };

        debug!("Found {} devices", devices.len());
        Ok(devices)
    }

    /// Device id for the configured serial number, resolved on first use.
    pub async fn get_device_id(&self) -> Result<String> {
        let mut cached = self.device_id.lock().await;
        if let Some(id) = cached.as_ref() {
            return Ok(id.clone());
        }

        let devices = self.get_devices().await?;
        let id = devices
            .iter()
            .find(|d| d.serial_number() == Some(self.device_serial_number.as_str()))
            .and_then(Device::id)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "device with serial number '{}' not found",
                    self.device_serial_number
                ))
            })?;

        info!(
            "Resolved serial number {} to device {}",
            self.device_serial_number, id
        );
        *cached = Some(id.clone());
        Ok(id)
    }

    pub async fn get_device_detail(&self, device_id: &str) -> Result<DeviceDetail> {
        let path = format!("/devices/{}/detail-or-summary", device_id);
        let response = self.execute(Method::GET, &path, None).await?;

        match response.body {
            Value::Null => Ok(DeviceDetail::default()),
            body => Ok(serde_json::from_value::<DeviceDetailResponse>(body)?.device),
        }
    }

    /// Current telemetry of the configured softener.
    pub async fn get_data(&self) -> Result<SoftenerData> {
        let device_id = self.get_device_id().await?;
        let detail = self.get_device_detail(&device_id).await?;
        Ok(SoftenerData::from_detail(&detail))
    }

    pub async fn get_flow_and_salt(&self) -> Result<FlowAndSalt> {
        let device_id = self.get_device_id().await?;
        let detail = self.get_device_detail(&device_id).await?;
        Ok(FlowAndSalt::from_detail(&detail))
    }

    async fn send_command(&self, command: DeviceCommand) -> Result<Value> {
        let device_id = self.get_device_id().await?;
        let path = format!("/devices/{}/command", device_id);

        debug!("Sending command to {}: {:?}", device_id, command);
        let body = serde_json::to_value(&command)?;
        let response = self.execute(Method::PUT, &path, Some(&body)).await?;

        debug!("Command {}/{} acknowledged", command.function, command.action);
        Ok(response.body)
    }

    pub async fn set_water_shutoff_valve(&self, action: ValveAction) -> Result<Value> {
        self.send_command(action.into()).await
    }

    /// Open the shutoff valve, allowing water to flow.
    pub async fn open_water_shutoff_valve(&self) -> Result<Value> {
        self.set_water_shutoff_valve(ValveAction::Open).await
    }

    /// Close the shutoff valve, stopping water flow.
    pub async fn close_water_shutoff_valve(&self) -> Result<Value> {
        self.set_water_shutoff_valve(ValveAction::Close).await
    }

    pub async fn regeneration(&self, action: RegenerationAction) -> Result<Value> {
        self.send_command(action.into()).await
    }

    pub async fn schedule_regeneration(&self) -> Result<Value> {
        self.regeneration(RegenerationAction::Schedule).await
    }

    pub async fn cancel_scheduled_regeneration(&self) -> Result<Value> {
        self.regeneration(RegenerationAction::Cancel).await
    }

    pub async fn regenerate_now(&self) -> Result<Value> {
        self.regeneration(RegenerationAction::Now).await
    }

    /// Copy of the current token state.
    pub async fn tokens(&self) -> TokenState {
        self.session.snapshot().await
    }

    pub async fn restore_tokens(&self, tokens: TokenState) {
        self.session.replace(tokens).await
    }

    pub async fn save_tokens(&self, path: &Path) -> Result<()> {
        self.tokens().await.save_to_file(path)
    }

    /// Restore tokens from `path`. Returns `false` if the file does not exist.
    pub async fn load_tokens(&self, path: &Path) -> Result<bool> {
        match TokenState::load_from_file(path)? {
            Some(tokens) => {
                self.restore_tokens(tokens).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

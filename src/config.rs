use dirs::home_dir;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

pub const DEFAULT_API_BASE_URL: &str = "https://api.myiquaapp.com/v1";
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Connection settings for an [`IquaClient`](crate::IquaClient).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_base_url: String,
    /// Timeout for login and refresh calls.
    pub auth_timeout: Duration,
    /// Timeout for every other call.
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ClientConfig {
    pub fn with_base_url(mut self, api_base_url: impl Into<String>) -> Self {
        self.api_base_url = api_base_url.into();
        self
    }

    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Configuration data stored in ~/.iqua.yml by the CLI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub username: String,
    pub device_serial_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,
}

impl Config {
    pub fn client_config(&self) -> ClientConfig {
        match &self.api_base_url {
            Some(url) => ClientConfig::default().with_base_url(url.clone()),
            None => ClientConfig::default(),
        }
    }
}

fn home_path(file_name: &str) -> Result<PathBuf> {
    let home = home_dir()
        .ok_or_else(|| Error::Config("failed to determine home directory".to_string()))?;
    Ok(home.join(file_name))
}

/// Get the path to the configuration file (~/.iqua.yml)
pub fn get_config_path() -> Result<PathBuf> {
    home_path(".iqua.yml")
}

/// Get the path to the saved token state (~/.iqua-tokens.json)
pub fn get_tokens_path() -> Result<PathBuf> {
    home_path(".iqua-tokens.json")
}

/// Load configuration from `path`. A missing file yields `Ok(None)`.
pub fn load_config_from(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path)?;
    let config: Config = serde_yaml::from_str(&content).map_err(|e| {
        Error::Config(format!(
            "configuration in {} is incomplete ({}). Please run 'iqua login' first.",
            path.display(),
            e
        ))
    })?;

    debug!("Loaded configuration for user: {}", config.username);
    Ok(Some(config))
}

pub fn save_config_to(path: &Path, config: &Config) -> Result<()> {
    let content = serde_yaml::to_string(config)?;
    fs::write(path, content)?;

    debug!("Saved configuration for user: {}", config.username);
    Ok(())
}

/// Load configuration from ~/.iqua.yml
pub fn load_config() -> Result<Option<Config>> {
    load_config_from(&get_config_path()?)
}

/// Save configuration to ~/.iqua.yml
pub fn save_config(config: &Config) -> Result<()> {
    save_config_to(&get_config_path()?, config)
}

/// Remove the configuration and token files (logout)
pub fn clear_config() -> Result<()> {
    for path in [get_config_path()?, get_tokens_path()?] {
        if path.exists() {
            fs::remove_file(&path)?;
            debug!("Removed {}", path.display());
        } else {
            warn!("{} does not exist, nothing to clear", path.display());
        }
    }

    Ok(())
}

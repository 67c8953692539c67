//! Device configuration.
//!
//! Loaded once at startup from `<config dir>/edgelink/device.json`, then
//! overridden by environment variables. Immutable afterwards.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use edgelink_protocol::constants::{default_request_topic, default_response_topic};

/// Environment variable overriding [`DeviceConfig::device_name`].
pub const ENV_DEVICE_NAME: &str = "DEVICE_NAME";
pub const ENV_REGION: &str = "AWS_REGION";
pub const ENV_HUB_ID: &str = "HUB_ID";
pub const ENV_CERTS_DIR: &str = "EDGELINK_CERTS_DIR";
pub const ENV_DISCOVERY_ENDPOINT: &str = "EDGELINK_DISCOVERY_ENDPOINT";

/// Errors while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Everything the device needs to discover and reach its hubs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Logical device name. Also the MQTT client id.
    pub device_name: String,

    pub region: String,

    /// Hub the device was associated with at registration time.
    pub hub_id: String,

    /// Directory holding the credential files.
    pub certs_dir: PathBuf,

    /// Base URL replacing the regional discovery endpoint.
    pub discovery_endpoint: Option<String>,

    pub request_topic: Option<String>,
    pub response_topic: Option<String>,

    /// Connection attempts run in parallel; 1 means one at a time.
    pub max_parallel_attempts: usize,
}

fn default_name() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "edgelink-device".into());
    // Registry thing names allow alphanumerics, ':', '_' and '-'.
    host.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, ':' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_name: default_name(),
            region: String::new(),
            hub_id: String::new(),
            certs_dir: config_base_dir().join("edgelink").join("certs"),
            discovery_endpoint: None,
            request_topic: None,
            response_topic: None,
            max_parallel_attempts: 1,
        }
    }
}

impl DeviceConfig {
    /// Loads from the default file and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_path(), |key| std::env::var(key).ok())
    }

    /// Loads from `path` (skipped if absent), then applies `env` overrides
    /// and validates the result.
    pub fn load_from(
        path: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            let config: DeviceConfig =
                serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?;
            tracing::debug!(path = %path.display(), "configuration file loaded");
            config
        } else {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            DeviceConfig::default()
        };

        config.apply_env(env);
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        let set = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = set(ENV_DEVICE_NAME) {
            self.device_name = v;
        }
        if let Some(v) = set(ENV_REGION) {
            self.region = v;
        }
        if let Some(v) = set(ENV_HUB_ID) {
            self.hub_id = v;
        }
        if let Some(v) = set(ENV_CERTS_DIR) {
            self.certs_dir = PathBuf::from(v);
        }
        if let Some(v) = set(ENV_DISCOVERY_ENDPOINT) {
            self.discovery_endpoint = Some(v);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_name.trim().is_empty() {
            return Err(ConfigError::Invalid("device name is empty".into()));
        }
        if self.region.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "region is not set (use {ENV_REGION} or the config file)"
            )));
        }
        if self.max_parallel_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_parallel_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Topic the health check publishes on.
    pub fn request_topic(&self) -> String {
        self.request_topic
            .clone()
            .unwrap_or_else(|| default_request_topic(&self.device_name))
    }

    /// Topic the health check listens on.
    pub fn response_topic(&self) -> String {
        self.response_topic
            .clone()
            .unwrap_or_else(|| default_response_topic(&self.device_name))
    }
}

/// Default configuration file location.
pub fn config_path() -> PathBuf {
    config_base_dir().join("edgelink").join("device.json")
}

fn config_base_dir() -> PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(xdg);
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata)
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home).join(".config")
    }
}

//! Server configuration management

use anyhow::{Context, Result, anyhow};
use common::SocketName;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::network::BrokerOptions;
use crate::policy::PeerPolicy;
use crate::shutdown::ShutdownPolicy;
use crate::usb::DeviceFilter;

/// Default application id the socket name is derived from
pub const DEFAULT_APP_ID: &str = "usb-broker";

/// Suffix appended to the application id to form the socket name
pub const SOCKET_NAME_SUFFIX: &str = ".libusb";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub security: SecuritySettings,
    #[serde(default)]
    pub usb: UsbSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "ServerSettings::default_app_id")]
    pub app_id: String,
    /// Abstract socket name; defaults to `<app_id>.libusb`
    #[serde(default)]
    pub socket_name: Option<String>,
    /// Listen on this filesystem path instead of the abstract namespace
    #[serde(default)]
    pub socket_path: Option<PathBuf>,
    #[serde(default = "ServerSettings::default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub service_mode: bool,
    #[serde(default)]
    pub shutdown: ShutdownPolicy,
}

impl ServerSettings {
    fn default_app_id() -> String {
        DEFAULT_APP_ID.to_string()
    }

    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            app_id: Self::default_app_id(),
            socket_name: None,
            socket_path: None,
            log_level: Self::default_log_level(),
            service_mode: false,
            shutdown: ShutdownPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecuritySettings {
    /// UIDs admitted in addition to the broker's own
    #[serde(default)]
    pub allowed_uids: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbSettings {
    /// VID:PID patterns the filter permission service grants (empty = all)
    #[serde(default)]
    pub filters: Vec<String>,
    /// libusb event loop timeout
    #[serde(default = "UsbSettings::default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl UsbSettings {
    fn default_poll_interval() -> u64 {
        100
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn device_filters(&self) -> Result<Vec<DeviceFilter>> {
        DeviceFilter::parse_all(&self.filters).map_err(|e| anyhow!(e))
    }
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            poll_interval_ms: Self::default_poll_interval(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).into_owned())
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usb-broker/server.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Parse and validate TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: ServerConfig = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usb-broker").join("server.toml")
        } else {
            PathBuf::from(".config/usb-broker/server.toml")
        }
    }

    /// Socket the broker listens on
    pub fn socket(&self) -> SocketName {
        if let Some(path) = &self.server.socket_path {
            return SocketName::path(shellexpand::tilde(&path.to_string_lossy()).into_owned());
        }
        match &self.server.socket_name {
            Some(name) => SocketName::abstract_name(name.clone()),
            None => SocketName::abstract_name(format!("{}{}", self.server.app_id, SOCKET_NAME_SUFFIX)),
        }
    }

    /// Listener options derived from this configuration
    pub fn broker_options(&self) -> BrokerOptions {
        BrokerOptions::new(self.socket())
            .with_peers(PeerPolicy::current_user(
                self.security.allowed_uids.iter().copied(),
            ))
            .with_shutdown_policy(self.server.shutdown)
    }

    /// Validate configuration values
    ///
    /// Also run after command-line overrides are applied.
    pub fn validate(&self) -> Result<()> {
        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.server.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.server.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.server.app_id.is_empty() {
            return Err(anyhow!("app_id must not be empty"));
        }
        if matches!(&self.server.socket_name, Some(name) if name.is_empty()) {
            return Err(anyhow!("socket_name must not be empty"));
        }
        if matches!(&self.server.socket_path, Some(path) if path.as_os_str().is_empty()) {
            return Err(anyhow!("socket_path must not be empty"));
        }

        if self.usb.poll_interval_ms == 0 {
            return Err(anyhow!("poll_interval_ms must be greater than zero"));
        }

        // Validate USB filters (VID:PID format)
        self.usb.device_filters()?;

        Ok(())
    }
}

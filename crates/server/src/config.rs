//! Server configuration management

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// System-wide configuration file, tried after the per-user one
const SYSTEM_CONFIG_PATH: &str = "/etc/calc-usbip/server.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub device: DeviceSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Address the USB/IP listener binds to
    #[serde(default = "ServerSettings::default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "ServerSettings::default_log_level")]
    pub log_level: String,
    /// Initial state of the per-URB diagnostics toggle
    #[serde(default)]
    pub verbose: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: Self::default_bind_addr(),
            log_level: Self::default_log_level(),
            verbose: false,
        }
    }
}

impl ServerSettings {
    fn default_bind_addr() -> String {
        format!("0.0.0.0:{}", protocol::USBIP_PORT)
    }

    fn default_log_level() -> String {
        "info".to_string()
    }
}

/// Emulated device timing and the stand-alone loopback device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Length of the presence pulse sent when the server starts
    #[serde(default = "DeviceSettings::default_present_pulse_ms")]
    pub present_pulse_ms: u64,
    /// Length of the bus reset sent for every new client
    #[serde(default = "DeviceSettings::default_reset_pulse_ms")]
    pub reset_pulse_ms: u64,
    /// Attach the built-in loopback device when running the binary
    #[serde(default = "DeviceSettings::default_loopback")]
    pub loopback: bool,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            present_pulse_ms: Self::default_present_pulse_ms(),
            reset_pulse_ms: Self::default_reset_pulse_ms(),
            loopback: Self::default_loopback(),
        }
    }
}

impl DeviceSettings {
    fn default_present_pulse_ms() -> u64 {
        100
    }

    fn default_reset_pulse_ms() -> u64 {
        50
    }

    fn default_loopback() -> bool {
        true
    }

    pub fn present_pulse(&self) -> Duration {
        Duration::from_millis(self.present_pulse_ms)
    }

    pub fn reset_pulse(&self) -> Duration {
        Duration::from_millis(self.reset_pulse_ms)
    }
}

impl ServerConfig {
    /// Load configuration from the specified path
    ///
    /// Without a path, the per-user file and then the system-wide file are
    /// tried; it is an error if neither exists.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            let candidates = vec![Self::default_path(), PathBuf::from(SYSTEM_CONFIG_PATH)];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: ServerConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("{:#}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
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
            config_dir.join("calc-usbip").join("server.toml")
        } else {
            PathBuf::from(".config/calc-usbip/server.toml")
        }
    }

    /// The listener address, parsed
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server
            .bind_addr
            .parse()
            .with_context(|| format!("Invalid bind address '{}'", self.server.bind_addr))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.server.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.server.log_level,
                valid_levels.join(", ")
            ));
        }

        self.bind_addr()?;

        if self.device.reset_pulse_ms == 0 {
            return Err(anyhow!("reset_pulse_ms must be greater than 0"));
        }

        Ok(())
    }
}

/// Load a configuration file named on the command line (`~` is expanded)
pub fn load_config(path: &str) -> Result<ServerConfig> {
    let path_buf = PathBuf::from(shellexpand::tilde(path).as_ref());
    ServerConfig::load(Some(path_buf))
}

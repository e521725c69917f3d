//! Persisted agent settings.
//!
//! Stored as pretty-printed JSON at `<config dir>/btlock/settings.json`.
//! A missing file yields the defaults; unknown fields are ignored and
//! missing fields take their default.

pub mod error;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::lock::SystemLockAction;
use crate::types::{
    ClientConfig, SecurityLevel, DEFAULT_IO_TIMEOUT_SECS, DEFAULT_POLL_INTERVAL_SECS,
};

pub use error::{Result, SettingsError};

/// Directory name under the platform config directory.
pub const APP_DIR_NAME: &str = "btlock";

/// Settings file name.
pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// Default daemon port.
pub const DEFAULT_DAEMON_PORT: u16 = 4567;

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    DEFAULT_DAEMON_PORT
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_io_timeout() -> u64 {
    DEFAULT_IO_TIMEOUT_SECS
}

/// User-editable agent settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSettings {
    /// Daemon host name or address
    #[serde(default = "default_host")]
    pub host: String,
    /// Daemon port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Address the daemon certificate is pinned to (defaults to `host`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned_host: Option<String>,
    #[serde(default)]
    pub security_level: SecurityLevel,
    /// Pre-computed HMAC for level 3
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac: Option<String>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_io_timeout")]
    pub io_timeout_seconds: u64,
    /// Path of the pinned daemon certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_path: Option<PathBuf>,
    /// Activate as soon as the agent starts
    #[serde(default)]
    pub start_silently: bool,
    /// Command run instead of the platform lock command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_command: Option<Vec<String>>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            pinned_host: None,
            security_level: SecurityLevel::default(),
            hmac: None,
            poll_interval_seconds: default_poll_interval(),
            io_timeout_seconds: default_io_timeout(),
            cert_path: None,
            start_silently: false,
            lock_command: None,
        }
    }
}

impl AgentSettings {
    /// Default settings file location.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::ConfigDirNotFound` when the platform has no
    /// per-user configuration directory.
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR_NAME).join(SETTINGS_FILE_NAME))
            .ok_or(SettingsError::ConfigDirNotFound)
    }

    /// Loads settings from `path`, or the defaults if it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings file at {:?}; using defaults", path);
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(SettingsError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        serde_json::from_str(&text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Writes settings to `path`, creating its directory if needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(SettingsError::DirectoryCreation)?;
        }

        let json = serde_json::to_string_pretty(self).map_err(SettingsError::Serialize)?;
        std::fs::write(path, json + "\n").map_err(SettingsError::Write)?;
        debug!("Saved settings to {:?}", path);
        Ok(())
    }

    /// Daemon authority, `host:port` (IPv6 hosts bracketed).
    pub fn endpoint(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Builds and validates the session configuration.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::Invalid` with the validation message.
    pub fn client_config(&self) -> Result<ClientConfig> {
        if self.port == 0 {
            return Err(SettingsError::Invalid(
                "ポート番号は1-65535の範囲で指定してください".to_string(),
            ));
        }

        let mut config = ClientConfig::new(self.endpoint())
            .with_security_level(self.security_level)
            .with_poll_interval(self.poll_interval_seconds)
            .with_io_timeout(self.io_timeout_seconds);
        if let Some(hmac) = &self.hmac {
            config = config.with_hmac(hmac.clone());
        }
        if let Some(pinned) = &self.pinned_host {
            config = config.with_expected_host(pinned.clone());
        }

        config.validate().map_err(SettingsError::Invalid)?;
        Ok(config)
    }

    /// The lock action these settings select.
    pub fn lock_action(&self) -> Result<SystemLockAction> {
        SystemLockAction::from_settings(self.lock_command.clone())
            .map_err(|e| SettingsError::Invalid(e.to_string()))
    }

    /// Validates every field.
    pub fn validate(&self) -> Result<()> {
        self.client_config()?;
        self.lock_action()?;
        Ok(())
    }
}

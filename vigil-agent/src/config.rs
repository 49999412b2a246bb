//! Agent process configuration
//!
//! Handles:
//! - Engine endpoint and connection direction
//! - Reconnect delay
//! - Log level and format
//! - Location of the TOML file (env override or OS config dir)
//!
//! The monitoring configuration itself (checks, periods) is pushed by the
//! engine over the stream and never read from disk.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "VIGIL_AGENT_CONFIG";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Supervised host name. Empty means the machine hostname.
    pub host: String,
    /// `host:port` to connect to, or to listen on with `reverse_connection`.
    pub endpoint: String,
    /// Let the engine connect to the agent instead of the other way round.
    pub reverse_connection: bool,
    pub reconnect_delay_secs: u64,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            endpoint: "localhost:4317".to_string(),
            reverse_connection: false,
            reconnect_delay_secs: 10,
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
        }
    }
}

impl AgentConfig {
    /// Load from the OS-specific location. A missing file gives the defaults.
    pub async fn load() -> Result<Self, ConfigError> {
        let path = Self::config_file_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path).await
    }

    pub async fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: AgentConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("endpoint must not be empty".to_string()));
        }
        if self.reconnect_delay_secs == 0 {
            return Err(ConfigError::Invalid("reconnect_delay_secs must be positive".to_string()));
        }
        Ok(())
    }

    /// `$VIGIL_AGENT_CONFIG`, else `<config dir>/vigil-agent/config.toml`.
    pub fn config_file_path() -> Result<PathBuf, ConfigError> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Ok(PathBuf::from(path));
        }
        let mut path = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        path.push("vigil-agent");
        path.push("config.toml");
        Ok(path)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    /// Configured host, or the machine hostname.
    pub fn host_name(&self) -> String {
        if self.host.is_empty() {
            crate::discovery::hostname()
        } else {
            self.host.clone()
        }
    }
}

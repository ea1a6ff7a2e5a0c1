//! Persistent application configuration
//!
//! Stores the upstream addresses, listen address, and console defaults in a
//! JSON file at `<config_dir>/callscope/config.json`. Every field has a
//! default, so partial files load fine.

use callscope_core::{CoreConfig, ViewControls, DEFAULT_MAX_EVENTS};
use callscope_server::ServerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors reading or writing the config file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8930
}

fn default_max_events() -> usize {
    DEFAULT_MAX_EVENTS
}

fn default_min_audio_packets() -> usize {
    1
}

fn default_refresh_interval_ms() -> u64 {
    100
}

fn default_reconnect_delay_ms() -> u64 {
    3000
}

fn default_hide_noise() -> bool {
    true
}

/// Persistent application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// WebSocket address of the telemetry stream (None = no uplink)
    #[serde(default)]
    pub uplink_url: Option<String>,
    /// Base URL of the upstream control API (None = capture control off)
    #[serde(default)]
    pub control_url: Option<String>,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Event store capacity
    #[serde(default = "default_max_events")]
    pub max_events: usize,
    /// Fewest packets worth playing back
    #[serde(default = "default_min_audio_packets")]
    pub min_audio_packets: usize,
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Start with media-packet noise hidden
    #[serde(default = "default_hide_noise")]
    pub hide_noise: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            uplink_url: None,
            control_url: None,
            bind_addr: default_bind_addr(),
            port: default_port(),
            max_events: default_max_events(),
            min_audio_packets: default_min_audio_packets(),
            refresh_interval_ms: default_refresh_interval_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            hide_noise: default_hide_noise(),
        }
    }
}

impl AppConfig {
    /// Config file path: `<config_dir>/callscope/config.json`
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("callscope")
            .join("config.json")
    }

    /// Load config from the default path, falling back to defaults on any error
    pub fn load() -> Self {
        Self::load_or_default(&Self::path())
    }

    /// Load config from `path`, falling back to defaults on any error
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load_from(path) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "Loaded config from disk");
                config
            }
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                Self::default()
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to load config, using defaults");
                Self::default()
            }
        }
    }

    /// Load config from `path`
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Save config to disk, creating parent directories if needed
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Config saved to disk");
        Ok(())
    }

    /// Store and audio settings
    pub fn core_config(&self) -> CoreConfig {
        CoreConfig {
            max_events: self.max_events.max(1),
            min_audio_packets: self.min_audio_packets.max(1),
            ..CoreConfig::default()
        }
    }

    /// Listen and refresh settings
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            port: self.port,
            bind_addr: self.bind_addr.clone(),
            refresh_interval: Duration::from_millis(self.refresh_interval_ms.max(10)),
            ..ServerConfig::default()
        }
    }

    /// View controls the console starts with
    pub fn initial_controls(&self) -> ViewControls {
        ViewControls {
            hide_noise: self.hide_noise,
            ..ViewControls::default()
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.uplink_url, None);
        assert_eq!(config.port, 8930);
        assert_eq!(config.max_events, 10_000);
        assert_eq!(config.refresh_interval_ms, 100);
        assert_eq!(config.reconnect_delay_ms, 3000);
        assert!(config.hide_noise);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let json = r#"{"uplink_url": "ws://10.0.0.5:11070/ws", "max_events": 500}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.uplink_url.as_deref(), Some("ws://10.0.0.5:11070/ws"));
        assert_eq!(config.max_events, 500);
        assert_eq!(config.port, 8930);
        assert!(config.hide_noise);
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = AppConfig {
            control_url: Some("http://10.0.0.5:11070".to_string()),
            port: 9000,
            hide_noise: false,
            ..AppConfig::default()
        };
        config.save(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_broken_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(AppConfig::load_from(&path), Err(ConfigError::Parse(_))));
        assert_eq!(AppConfig::load_or_default(&path), AppConfig::default());
    }

    #[test]
    fn test_missing_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        assert!(matches!(AppConfig::load_from(&path), Err(ConfigError::Io(_))));
        assert_eq!(AppConfig::load_or_default(&path), AppConfig::default());
    }

    #[test]
    fn test_derived_configs() {
        let config = AppConfig {
            max_events: 0,
            refresh_interval_ms: 250,
            hide_noise: false,
            ..AppConfig::default()
        };
        assert_eq!(config.core_config().max_events, 1);
        assert_eq!(config.core_config().sample_rate, 8000);
        assert_eq!(config.server_config().refresh_interval, Duration::from_millis(250));
        assert!(!config.initial_controls().hide_noise);
        assert_eq!(config.reconnect_delay(), Duration::from_millis(3000));
    }
}

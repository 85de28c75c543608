//! Configuration management for wrtflash

mod connection;
mod discovery;
pub mod serde_utils;
mod upgrade;

pub use connection::ConnectionConfig;
pub use discovery::DiscoveryConfig;
pub use upgrade::{ReleaseConfig, UpgradeConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cidr::Cidr;
use crate::error::ConfigError;

/// Complete configuration file (`config.toml`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub connection: ConnectionConfig,
    pub discovery: DiscoveryConfig,
    pub upgrade: UpgradeConfig,
    pub releases: ReleaseConfig,
}

impl AppConfig {
    /// Check values that would otherwise only fail once the network is touched
    pub fn validate(&self) -> Result<(), ConfigError> {
        for subnet in &self.discovery.subnets {
            subnet.parse::<Cidr>()?;
        }
        if self.upgrade.reboot_poll_attempts == 0 {
            return Err(ConfigError::Invalid(
                "upgrade.reboot_poll_attempts must be at least 1".to_string(),
            ));
        }
        if !self.upgrade.remote_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "upgrade.remote_path must be absolute: {}",
                self.upgrade.remote_path
            )));
        }
        if self.discovery.max_concurrent_probes == 0 {
            return Err(ConfigError::Invalid(
                "discovery.max_concurrent_probes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("wrtflash")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Load the application config, falling back to defaults when the file is absent
pub fn load_or_default(path: &Path) -> Result<AppConfig, ConfigError> {
    let config = match load_config::<AppConfig>(path) {
        Ok(config) => config,
        Err(ConfigError::NotFound(_)) => {
            tracing::debug!("No config at {:?}, using defaults", path);
            AppConfig::default()
        }
        Err(e) => return Err(e),
    };
    config.validate()?;
    Ok(config)
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.connection.username, "root");
        assert_eq!(config.connection.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.connection.quick_connect_timeout, Duration::from_secs(1));
        assert_eq!(config.upgrade.reboot_poll_attempts, 30);
        assert_eq!(config.upgrade.reboot_poll_interval, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let toml = r#"
            [discovery]
            subnets = ["192.168.8.0/24"]
            probe_timeout = 250

            [upgrade]
            keep_settings = true
        "#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.discovery.subnets, vec!["192.168.8.0/24".to_string()]);
        assert_eq!(config.discovery.probe_timeout, Duration::from_millis(250));
        assert_eq!(config.discovery.ssh_port, 22);
        assert!(config.upgrade.keep_settings);
        assert_eq!(config.upgrade.remote_path, "/tmp/firmware.bin");
    }

    #[test]
    fn test_validate_rejects_wide_subnet() {
        let mut config = AppConfig::default();
        config.discovery.subnets = vec!["10.0.0.0/8".to_string()];
        assert!(matches!(config.validate(), Err(ConfigError::Discovery(_))));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.releases.feed_url = Some("https://releases.example.invalid/feed.json".into());
        save_config(&path, &config).unwrap();

        let loaded = load_or_default(&path).unwrap();
        assert_eq!(loaded.releases.feed_url, config.releases.feed_url);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.connection.port, 22);
    }
}

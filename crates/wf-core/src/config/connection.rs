//! SSH connection configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};

/// Settings for the connection manager and file transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Login user on the device
    pub username: String,

    /// SSH port on the device
    pub port: u16,

    /// Timeout for the primary login path
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Timeout for availability polling
    #[serde(with = "duration_millis")]
    pub quick_connect_timeout: Duration,

    /// Secure-copy program used for file delivery
    pub scp_program: String,

    /// Helper used to feed a password to the copy program
    pub password_helper: String,

    /// Force the legacy SCP protocol instead of SFTP (`scp -O`)
    pub legacy_scp: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            username: "root".to_string(),
            port: 22,
            connect_timeout: Duration::from_secs(10),
            quick_connect_timeout: Duration::from_millis(1000),
            scp_program: "scp".to_string(),
            password_helper: "sshpass".to_string(),
            legacy_scp: true,
        }
    }
}

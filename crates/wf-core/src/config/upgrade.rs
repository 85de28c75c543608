//! Upgrade pipeline configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;
use crate::types::FirmwareDescriptor;

/// Settings for the upgrade orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradeConfig {
    /// Where the image is placed on the device before flashing
    pub remote_path: String,

    /// Local directory for downloaded images
    pub scratch_dir: PathBuf,

    /// Reconnect attempts while waiting for the device to reboot
    pub reboot_poll_attempts: u32,

    /// Pause between reconnect attempts
    #[serde(with = "duration_secs")]
    pub reboot_poll_interval: Duration,

    /// Keep device configuration across the flash (omit `sysupgrade -n`)
    pub keep_settings: bool,

    /// File read after reboot to confirm the new firmware is running
    pub version_marker_path: String,

    /// Extra wait after the device answers again, before verification
    #[serde(with = "duration_secs")]
    pub post_install_delay: Duration,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            remote_path: "/tmp/firmware.bin".to_string(),
            scratch_dir: std::env::temp_dir().join("wrtflash"),
            reboot_poll_attempts: 30,
            reboot_poll_interval: Duration::from_secs(5),
            keep_settings: false,
            version_marker_path: "/etc/openwrt_version".to_string(),
            post_install_delay: Duration::from_secs(0),
        }
    }
}

/// Release feed settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseConfig {
    /// JSON endpoint listing firmware descriptors
    pub feed_url: Option<String>,

    /// Descriptors served when the feed is unset or unreachable
    pub fallback: Vec<FirmwareDescriptor>,
}

//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Network address of a target device.
///
/// This is the primary key for all per-device state: sessions, probes and
/// upgrade runs are all indexed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(pub Ipv4Addr);

impl Address {
    /// Create a new address
    pub fn new(ip: Ipv4Addr) -> Self {
        Self(ip)
    }

    /// Get the underlying IPv4 address
    pub fn ip(&self) -> Ipv4Addr {
        self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Address {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<Ipv4Addr>().map(Self)
    }
}

impl From<Ipv4Addr> for Address {
    fn from(ip: Ipv4Addr) -> Self {
        Self(ip)
    }
}

/// How a candidate address was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeOrigin {
    /// Conventional gateway position of a local interface, or the default route
    Gateway,
    /// Configured subnet sweep
    Subnet,
    /// Address supplied by hand
    Manual,
}

impl fmt::Display for ProbeOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeOrigin::Gateway => write!(f, "gateway"),
            ProbeOrigin::Subnet => write!(f, "subnet"),
            ProbeOrigin::Manual => write!(f, "manual"),
        }
    }
}

/// Readiness of a probed device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeStatus {
    /// SSH port answered
    Ready,
    /// Nothing listening on the SSH port
    NoSsh,
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeStatus::Ready => write!(f, "ready"),
            ProbeStatus::NoSsh => write!(f, "no-ssh"),
        }
    }
}

/// Result of testing one address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceProbe {
    pub address: Address,
    pub ssh_reachable: bool,
    pub origin: ProbeOrigin,
    pub status: ProbeStatus,
    /// Whether board identification reported an OpenWrt-family distribution
    pub is_openwrt: bool,
    /// Present only when enrichment succeeded
    pub board: Option<BoardInfo>,
}

impl DeviceProbe {
    /// A device whose SSH port answered, with whatever enrichment succeeded
    pub fn reachable(address: Address, origin: ProbeOrigin, board: Option<BoardInfo>) -> Self {
        let is_openwrt = board.as_ref().map(BoardInfo::is_openwrt).unwrap_or(false);
        Self {
            address,
            ssh_reachable: true,
            origin,
            status: ProbeStatus::Ready,
            is_openwrt,
            board,
        }
    }
}

/// Identification data read from a reachable device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardInfo {
    pub board_name: String,
    pub model: String,
    pub hostname: String,
    pub distribution: String,
    pub os_version: String,
    pub architecture: String,
}

impl BoardInfo {
    /// Whether the distribution marker names the OpenWrt family
    pub fn is_openwrt(&self) -> bool {
        let distribution = self.distribution.to_ascii_lowercase();
        distribution.contains("openwrt") || distribution.contains("lede")
    }
}

/// Firmware image description supplied by the release feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirmwareDescriptor {
    /// Human readable version string
    pub version: String,
    pub download_url: String,
    #[serde(default)]
    pub architecture: String,
    /// Board tags this image supports; empty means any board
    #[serde(default)]
    pub supported_devices: Vec<String>,
    /// Expected SHA-256 of the image, hex encoded
    #[serde(default)]
    pub sha256: Option<String>,
    /// Text expected in the version marker file after a successful flash
    #[serde(default)]
    pub version_marker: Option<String>,
}

impl FirmwareDescriptor {
    /// Create a descriptor with only the mandatory fields
    pub fn new(version: impl Into<String>, download_url: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            download_url: download_url.into(),
            architecture: String::new(),
            supported_devices: Vec::new(),
            sha256: None,
            version_marker: None,
        }
    }

    /// Whether this image lists the given board as supported.
    ///
    /// Tags match case-insensitively as substrings in either direction, with
    /// `vendor,model` board names also compared in their `vendor_model` form.
    pub fn supports_board(&self, board_name: &str) -> bool {
        if self.supported_devices.is_empty() {
            return true;
        }
        let board = board_name.trim().to_ascii_lowercase();
        if board.is_empty() {
            return false;
        }
        let normalized = board.replace(',', "_");

        self.supported_devices.iter().any(|tag| {
            let tag = tag.trim().to_ascii_lowercase();
            !tag.is_empty()
                && (board.contains(&tag)
                    || normalized.contains(&tag)
                    || tag.contains(&board)
                    || tag.contains(&normalized))
        })
    }
}

/// Captured output of one remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the server never reported an exit status
    pub exit_status: Option<u32>,
}

impl CommandOutput {
    /// Whether the command reported exit status zero
    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }
}

/// Stage of the upgrade pipeline, in strict forward order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpgradeStage {
    Preparing,
    CompatibilityCheck,
    DownloadPreparation,
    Downloading,
    Transferring,
    Verifying,
    Installing,
    WaitingForReboot,
    VerifyingInstallation,
    Complete,
}

impl UpgradeStage {
    /// Progress reported when the stage starts
    pub fn base_progress(&self) -> u8 {
        match self {
            UpgradeStage::Preparing => 0,
            UpgradeStage::CompatibilityCheck => 0,
            UpgradeStage::DownloadPreparation => 10,
            UpgradeStage::Downloading => 15,
            UpgradeStage::Transferring => 45,
            UpgradeStage::Verifying => 60,
            UpgradeStage::Installing => 70,
            UpgradeStage::WaitingForReboot => 80,
            UpgradeStage::VerifyingInstallation => 95,
            UpgradeStage::Complete => 100,
        }
    }

    /// Stable kebab-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            UpgradeStage::Preparing => "preparing",
            UpgradeStage::CompatibilityCheck => "compatibility-check",
            UpgradeStage::DownloadPreparation => "download-preparation",
            UpgradeStage::Downloading => "downloading",
            UpgradeStage::Transferring => "transferring",
            UpgradeStage::Verifying => "verifying",
            UpgradeStage::Installing => "installing",
            UpgradeStage::WaitingForReboot => "waiting-for-reboot",
            UpgradeStage::VerifyingInstallation => "verifying-installation",
            UpgradeStage::Complete => "complete",
        }
    }
}

impl fmt::Display for UpgradeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One progress notification from a running upgrade
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeProgress {
    pub stage: UpgradeStage,
    pub progress_percent: u8,
    pub message: String,
}

/// Terminal result of one upgrade run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeOutcome {
    pub success: bool,
    /// `Complete` on success, otherwise the stage that failed
    pub stage: UpgradeStage,
    pub progress_percent: u8,
    pub error: Option<String>,
}

/// Result of an explicit connect request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl ConnectOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(reason.into()),
        }
    }
}

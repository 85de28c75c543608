//! Core error types for wrtflash

use std::path::PathBuf;
use thiserror::Error;

use crate::types::UpgradeStage;

/// SSH connection and command errors.
///
/// Callers of the connection manager only branch on success or failure; the
/// variants exist so the upgrade pipeline can tell an expected disconnect
/// apart from everything else.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Connect attempt exceeded its deadline
    #[error("Connection timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Server rejected the credentials
    #[error("Authentication failed for {0}")]
    AuthenticationFailed(String),

    /// TCP connect or SSH handshake failed
    #[error("Connection refused: {0}")]
    Refused(String),

    /// Server closed the session while a command was in flight
    #[error("Connection closed: {0}")]
    Closed(String),

    /// Any other SSH protocol failure
    #[error("SSH error: {0}")]
    Ssh(String),

    /// No session exists and none could be opened
    #[error("Not connected to {0}")]
    NotConnected(String),
}

impl ConnectionError {
    /// Whether the remote end dropped the session
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, ConnectionError::Closed(_))
    }
}

/// File delivery errors
#[derive(Error, Debug)]
pub enum TransferError {
    /// Local file is missing or unreadable
    #[error("Local file {path:?} unavailable: {source}")]
    LocalFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Copy utility could not be started
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Copy utility ran and reported failure
    #[error("Copy failed ({status}): {stderr}")]
    Failed { status: String, stderr: String },

    /// Preparing the remote side failed
    #[error("Remote preparation failed: {0}")]
    Remote(#[from] ConnectionError),
}

/// Firmware download errors
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Invalid firmware URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Server responded with status {0}")]
    Status(u16),

    #[error("Failed to write {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    Checksum { expected: String, actual: String },
}

/// Discovery configuration errors.
///
/// Per-address probe failures are not errors; they are logged and skipped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("Invalid CIDR range '{0}'")]
    InvalidCidr(String),

    #[error("Subnet mask /{mask} in '{cidr}' is outside the supported /16 to /30 range")]
    MaskOutOfRange { cidr: String, mask: u8 },
}

/// Release feed errors
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Release feed request failed: {0}")]
    Http(String),

    #[error("Release feed returned malformed data: {0}")]
    Parse(String),

    #[error("No release feed configured and no fallback releases available")]
    Empty,
}

/// Failure of one upgrade pipeline stage
#[derive(Error, Debug)]
pub enum UpgradeError {
    #[error("Device is not compatible: {0}")]
    Compatibility(String),

    #[error("Firmware download failed: {0}")]
    Download(#[from] DownloadError),

    #[error("Firmware transfer failed: {0}")]
    Transfer(String),

    #[error("Transferred firmware not found on device: {0}")]
    Verification(String),

    #[error("Device did not come back after {attempts} attempts")]
    RebootTimeout { attempts: u32 },

    #[error("New firmware not detected after reboot: {0}")]
    PostInstallVerification(String),

    #[error("{0}")]
    Connection(#[from] ConnectionError),

    #[error("Firmware installation command failed: {0}")]
    Install(String),
}

impl UpgradeError {
    /// Attach the stage that produced this error
    pub fn at(self, stage: UpgradeStage) -> StageFailure {
        StageFailure { stage, error: self }
    }
}

/// An upgrade error tagged with the stage it terminated
#[derive(Error, Debug)]
#[error("{stage}: {error}")]
pub struct StageFailure {
    pub stage: UpgradeStage,
    #[source]
    pub error: UpgradeError,
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Subnet sweep range rejected
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

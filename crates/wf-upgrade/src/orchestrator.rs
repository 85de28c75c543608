//! Upgrade orchestrator
//!
//! Drives one device through the flashing pipeline:
//!
//! ```text
//! preparing -> compatibility-check -> download-preparation -> downloading
//!   -> transferring -> verifying -> installing -> waiting-for-reboot
//!   -> verifying-installation -> complete
//! ```
//!
//! Every stage converts its own failures into a [`StageFailure`], so a run
//! always ends in exactly one [`UpgradeOutcome`]. The only failure that is
//! *not* terminal is the connection dropping while the flash command runs:
//! that is the device rebooting into the new image.
//!
//! Runs against different addresses may share one orchestrator. Two runs
//! against the same address must not overlap; the caller serializes them.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tracing::Instrument;
use uuid::Uuid;

use wf_connection::command::shell_quote;
use wf_connection::{read_board_info, ConnectionManager};
use wf_core::config::UpgradeConfig;
use wf_core::error::{DownloadError, StageFailure, UpgradeError};
use wf_core::types::{
    Address, BoardInfo, FirmwareDescriptor, UpgradeOutcome, UpgradeProgress, UpgradeStage,
};

use crate::download::{file_name_for, verify_sha256, FirmwareFetcher, HttpDownloader};

/// Percent reached when the download finishes, before transfer starts
const DOWNLOAD_DONE_PERCENT: u8 = 40;

/// Runs staged firmware upgrades through a shared connection manager
pub struct UpgradeOrchestrator {
    connections: Arc<ConnectionManager>,
    fetcher: Arc<dyn FirmwareFetcher>,
    config: UpgradeConfig,
}

impl UpgradeOrchestrator {
    /// Orchestrator downloading over HTTP
    pub fn new(connections: Arc<ConnectionManager>, config: UpgradeConfig) -> Self {
        Self::with_fetcher(connections, Arc::new(HttpDownloader::new()), config)
    }

    pub fn with_fetcher(
        connections: Arc<ConnectionManager>,
        fetcher: Arc<dyn FirmwareFetcher>,
        config: UpgradeConfig,
    ) -> Self {
        Self {
            connections,
            fetcher,
            config,
        }
    }

    pub fn config(&self) -> &UpgradeConfig {
        &self.config
    }

    /// Flash `firmware` onto the device at `address`
    pub async fn install(&self, address: Address, firmware: &FirmwareDescriptor) -> UpgradeOutcome {
        self.run(address, firmware, ProgressReporter::new(None)).await
    }

    /// Like [`install`](Self::install), sending a progress event at every
    /// stage transition and while downloading.
    ///
    /// A dropped receiver does not affect the run.
    pub async fn install_with_progress(
        &self,
        address: Address,
        firmware: &FirmwareDescriptor,
        progress: UnboundedSender<UpgradeProgress>,
    ) -> UpgradeOutcome {
        self.run(address, firmware, ProgressReporter::new(Some(progress)))
            .await
    }

    async fn run(
        &self,
        address: Address,
        firmware: &FirmwareDescriptor,
        reporter: ProgressReporter,
    ) -> UpgradeOutcome {
        let span = tracing::info_span!("upgrade", run_id = %Uuid::new_v4(), %address);

        async move {
            tracing::info!("Installing firmware {} on {}", firmware.version, address);

            let mut scratch_file = None;
            let result = self
                .stages(address, firmware, &reporter, &mut scratch_file)
                .await;

            if let Some(path) = scratch_file {
                remove_scratch_file(&path).await;
            }

            match result {
                Ok(()) => {
                    reporter.enter(UpgradeStage::Complete, "Firmware installed");
                    tracing::info!("Upgrade of {} complete", address);
                    UpgradeOutcome {
                        success: true,
                        stage: UpgradeStage::Complete,
                        progress_percent: 100,
                        error: None,
                    }
                }
                Err(failure) => {
                    tracing::error!("Upgrade of {} failed at {}", address, failure);
                    UpgradeOutcome {
                        success: false,
                        stage: failure.stage,
                        progress_percent: reporter.percent(),
                        error: Some(failure.error.to_string()),
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn stages(
        &self,
        address: Address,
        firmware: &FirmwareDescriptor,
        reporter: &ProgressReporter,
        scratch_file: &mut Option<PathBuf>,
    ) -> Result<(), StageFailure> {
        use UpgradeStage::*;

        reporter.enter(
            Preparing,
            format!("Preparing to install {} on {}", firmware.version, address),
        );

        reporter.enter(CompatibilityCheck, "Reading board information");
        let board = self
            .check_compatibility(address, firmware)
            .await
            .map_err(|e| e.at(CompatibilityCheck))?;
        tracing::info!(
            "{} is {} running {} {}",
            address,
            board.board_name,
            board.distribution,
            board.os_version
        );
        let previous_marker = self.read_marker(address).await;

        reporter.enter(DownloadPreparation, "Resolving firmware image");
        let url = reqwest::Url::parse(&firmware.download_url)
            .map_err(|e| {
                UpgradeError::from(DownloadError::InvalidUrl(format!(
                    "{}: {}",
                    firmware.download_url, e
                )))
                .at(DownloadPreparation)
            })?;
        // One scratch file per device so parallel runs never share an image
        let local_path = self.config.scratch_dir.join(format!(
            "{}-{}",
            address,
            file_name_for(url.as_str(), &firmware.version)
        ));

        reporter.enter(Downloading, format!("Downloading {}", url));
        *scratch_file = Some(local_path.clone());
        let size = self
            .download(url.as_str(), &local_path, firmware, reporter)
            .await
            .map_err(|e| e.at(Downloading))?;

        let remote_path = self.config.remote_path.as_str();
        reporter.enter(Transferring, format!("Copying image to {}", remote_path));
        if !self
            .connections
            .transfer_file(address, &local_path, remote_path, None)
            .await
        {
            return Err(UpgradeError::Transfer(format!(
                "could not copy {} to {}:{}",
                local_path.display(),
                address,
                remote_path
            ))
            .at(Transferring));
        }

        reporter.enter(Verifying, "Checking the image on the device");
        self.verify_remote_file(address, remote_path, size)
            .await
            .map_err(|e| e.at(Verifying))?;

        reporter.enter(Installing, "Flashing firmware; the device will reboot");
        self.flash(address, remote_path)
            .await
            .map_err(|e| e.at(Installing))?;

        reporter.enter(WaitingForReboot, "Waiting for the device to come back");
        self.wait_for_reboot(address)
            .await
            .map_err(|e| e.at(WaitingForReboot))?;

        reporter.enter(VerifyingInstallation, "Checking the installed firmware");
        self.verify_installation(address, firmware, previous_marker.as_deref())
            .await
            .map_err(|e| e.at(VerifyingInstallation))?;

        Ok(())
    }

    /// Hard gate: the device must identify as OpenWrt with a board name the
    /// image supports.
    async fn check_compatibility(
        &self,
        address: Address,
        firmware: &FirmwareDescriptor,
    ) -> Result<BoardInfo, UpgradeError> {
        let board = read_board_info(&self.connections, address)
            .await
            .map_err(|e| {
                UpgradeError::Compatibility(format!("could not read board information: {}", e))
            })?
            .ok_or_else(|| {
                UpgradeError::Compatibility("device did not report board information".into())
            })?;

        if board.distribution.trim().is_empty() {
            return Err(UpgradeError::Compatibility(
                "device reported no distribution".into(),
            ));
        }
        if !board.is_openwrt() {
            return Err(UpgradeError::Compatibility(format!(
                "'{}' is not an OpenWrt distribution",
                board.distribution
            )));
        }
        if board.board_name.trim().is_empty() {
            return Err(UpgradeError::Compatibility(
                "device reported no board name".into(),
            ));
        }
        if !firmware.supports_board(&board.board_name) {
            return Err(UpgradeError::Compatibility(format!(
                "firmware {} does not list board '{}' (supports: {})",
                firmware.version,
                board.board_name,
                firmware.supported_devices.join(", ")
            )));
        }

        if !firmware.architecture.is_empty()
            && !board.architecture.is_empty()
            && !firmware.architecture.eq_ignore_ascii_case(&board.architecture)
        {
            tracing::warn!(
                "Firmware architecture {} differs from device architecture {}",
                firmware.architecture,
                board.architecture
            );
        }

        Ok(board)
    }

    async fn download(
        &self,
        url: &str,
        destination: &Path,
        firmware: &FirmwareDescriptor,
        reporter: &ProgressReporter,
    ) -> Result<u64, UpgradeError> {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| DownloadError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let start = UpgradeStage::Downloading.base_progress();
        let span = u64::from(DOWNLOAD_DONE_PERCENT - start);
        let on_progress = |done: u64, total: Option<u64>| {
            if let Some(total) = total.filter(|total| *total > 0) {
                let percent = start + (done.min(total) * span / total) as u8;
                reporter.advance(
                    UpgradeStage::Downloading,
                    percent,
                    format!("Downloaded {} of {} bytes", done, total),
                );
            }
        };

        let size = self.fetcher.fetch(url, destination, &on_progress).await?;

        if let Some(expected) = firmware.sha256.as_deref().filter(|s| !s.trim().is_empty()) {
            verify_sha256(destination, expected).await?;
            tracing::info!("Checksum verified");
        }

        reporter.advance(
            UpgradeStage::Downloading,
            DOWNLOAD_DONE_PERCENT,
            format!("Downloaded {} bytes", size),
        );
        Ok(size)
    }

    async fn verify_remote_file(
        &self,
        address: Address,
        remote_path: &str,
        expected_size: u64,
    ) -> Result<(), UpgradeError> {
        let listing = self
            .connections
            .execute(address, &format!("ls -l {}", shell_quote(remote_path)))
            .await
            .map_err(|e| UpgradeError::Verification(e.to_string()))?;

        if !listing.success() || !listing.stdout.contains(remote_path) {
            return Err(UpgradeError::Verification(format!(
                "{} is not present",
                remote_path
            )));
        }

        if let Some(size) = listed_size(&listing.stdout, remote_path) {
            if size != expected_size {
                return Err(UpgradeError::Verification(format!(
                    "{} is {} bytes, expected {}",
                    remote_path, size, expected_size
                )));
            }
        }

        Ok(())
    }

    /// Apply the image. Losing the connection here is the expected result.
    async fn flash(&self, address: Address, remote_path: &str) -> Result<(), UpgradeError> {
        let command = sysupgrade_command(remote_path, self.config.keep_settings);

        let result = match self.connections.execute(address, &command).await {
            Ok(output) if output.success() => {
                tracing::info!("sysupgrade accepted the image");
                Ok(())
            }
            Ok(output) => Err(UpgradeError::Install(format!(
                "exit status {:?}: {}",
                output.exit_status,
                output.stderr.trim()
            ))),
            Err(e) if e.is_connection_closed() => {
                tracing::info!("Connection dropped while flashing; device is rebooting");
                Ok(())
            }
            Err(e) => Err(UpgradeError::Connection(e)),
        };

        self.connections.close_connection(address).await;
        result
    }

    async fn wait_for_reboot(&self, address: Address) -> Result<(), UpgradeError> {
        let attempts = self.config.reboot_poll_attempts;
        let interval = self.config.reboot_poll_interval;

        // First of the `attempts` intervals; polling only sleeps between attempts
        tokio::time::sleep(interval).await;

        if !self
            .connections
            .poll_for_availability(address, attempts, interval)
            .await
        {
            return Err(UpgradeError::RebootTimeout { attempts });
        }

        if !self.config.post_install_delay.is_zero() {
            tokio::time::sleep(self.config.post_install_delay).await;
        }
        Ok(())
    }

    /// The marker must exist after the reboot. With an expected marker it must
    /// contain that text; otherwise it must differ from the pre-flash marker.
    async fn verify_installation(
        &self,
        address: Address,
        firmware: &FirmwareDescriptor,
        previous_marker: Option<&str>,
    ) -> Result<(), UpgradeError> {
        self.fresh_session(address).await?;

        let marker_path = self.config.version_marker_path.as_str();
        let output = self
            .connections
            .execute(address, &format!("cat {}", shell_quote(marker_path)))
            .await
            .map_err(|e| UpgradeError::PostInstallVerification(e.to_string()))?;

        let marker = output.stdout.trim();
        if !output.success() || marker.is_empty() {
            return Err(UpgradeError::PostInstallVerification(format!(
                "version marker {} not found",
                marker_path
            )));
        }

        match (firmware.version_marker.as_deref(), previous_marker) {
            (Some(expected), _) if !marker.contains(expected) => {
                return Err(UpgradeError::PostInstallVerification(format!(
                    "version marker reads '{}', expected '{}'",
                    marker, expected
                )));
            }
            (None, Some(previous)) if marker == previous => {
                return Err(UpgradeError::PostInstallVerification(format!(
                    "version marker still reads '{}'; the device is running its old firmware",
                    marker
                )));
            }
            (None, None) => {
                tracing::warn!(
                    "No version marker was read before flashing; cannot confirm {} replaced it",
                    firmware.version
                );
            }
            _ => {}
        }

        tracing::info!("Device reports firmware '{}'", marker);
        Ok(())
    }

    /// Current contents of the version marker file, if readable
    async fn read_marker(&self, address: Address) -> Option<String> {
        let marker_path = self.config.version_marker_path.as_str();
        match self
            .connections
            .execute(address, &format!("cat {}", shell_quote(marker_path)))
            .await
        {
            Ok(output) if output.success() && !output.stdout.trim().is_empty() => {
                let marker = output.stdout.trim().to_string();
                tracing::debug!("Version marker before flashing: '{}'", marker);
                Some(marker)
            }
            Ok(_) => {
                tracing::debug!("{} has no version marker at {}", address, marker_path);
                None
            }
            Err(e) => {
                tracing::debug!("Could not read version marker on {}: {}", address, e);
                None
            }
        }
    }

    /// Log in again after the reboot, trying the old password and then none
    async fn fresh_session(&self, address: Address) -> Result<(), UpgradeError> {
        let mut candidates: Vec<String> = self
            .connections
            .remembered_password(address)
            .into_iter()
            .collect();
        if !candidates.iter().any(String::is_empty) {
            candidates.push(String::new());
        }

        let mut last_error = None;
        for password in candidates {
            let outcome = self.connections.connect(address, &password).await;
            if outcome.success {
                return Ok(());
            }
            last_error = outcome.error;
        }

        Err(UpgradeError::PostInstallVerification(format!(
            "could not log in after reboot: {}",
            last_error.unwrap_or_else(|| "no credentials".to_string())
        )))
    }
}

/// Firmware apply command; `-n` discards the current configuration
pub fn sysupgrade_command(remote_path: &str, keep_settings: bool) -> String {
    if keep_settings {
        format!("sysupgrade {}", shell_quote(remote_path))
    } else {
        format!("sysupgrade -n {}", shell_quote(remote_path))
    }
}

/// Size column of an `ls -l` line for `path`, when the output has one
fn listed_size(listing: &str, path: &str) -> Option<u64> {
    listing
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>())
        .find(|tokens| tokens.len() >= 5 && tokens.last() == Some(&path))
        .and_then(|tokens| tokens[4].parse().ok())
}

async fn remove_scratch_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Could not remove {}: {}", path.display(), e),
    }
}

/// Keeps reported progress monotonic and forwards it to a subscriber
struct ProgressReporter {
    sender: Option<UnboundedSender<UpgradeProgress>>,
    percent: AtomicU8,
}

impl ProgressReporter {
    fn new(sender: Option<UnboundedSender<UpgradeProgress>>) -> Self {
        Self {
            sender,
            percent: AtomicU8::new(0),
        }
    }

    fn percent(&self) -> u8 {
        self.percent.load(Ordering::SeqCst)
    }

    /// Stage transition; always reported
    fn enter(&self, stage: UpgradeStage, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("[{}] {}", stage, message);
        let percent = self.raise(stage.base_progress());
        self.send(stage, percent, message);
    }

    /// Progress inside a stage; reported only when the percentage grows
    fn advance(&self, stage: UpgradeStage, percent: u8, message: String) {
        let previous = self.percent.fetch_max(percent, Ordering::SeqCst);
        if percent > previous {
            tracing::debug!("[{}] {}% {}", stage, percent, message);
            self.send(stage, percent, message);
        }
    }

    fn raise(&self, percent: u8) -> u8 {
        self.percent.fetch_max(percent, Ordering::SeqCst).max(percent)
    }

    fn send(&self, stage: UpgradeStage, progress_percent: u8, message: String) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(UpgradeProgress {
                stage,
                progress_percent,
                message,
            });
        }
    }
}

//! Install command implementation

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use wf_connection::ConnectionManager;
use wf_core::config::{ReleaseConfig, UpgradeConfig};
use wf_core::types::{Address, FirmwareDescriptor};
use wf_upgrade::{ReleaseFeed, Releases, UpgradeOrchestrator};

use crate::output::{format_outcome, format_progress, print_info, print_success, print_warning};

/// Where the image to flash comes from
#[derive(Debug, Clone)]
pub enum FirmwareChoice {
    /// Version looked up in the release feed
    Release(String),
    /// Descriptor given on the command line
    Manual(FirmwareDescriptor),
}

/// Flash firmware onto a device, printing each stage as it happens
pub async fn install_command(
    connections: Arc<ConnectionManager>,
    upgrade: UpgradeConfig,
    releases: ReleaseConfig,
    address: Address,
    choice: FirmwareChoice,
    marker: Option<String>,
    password: &str,
) -> Result<()> {
    let mut firmware = resolve_firmware(choice, releases).await?;
    if marker.is_some() {
        firmware.version_marker = marker;
    }
    tracing::debug!("Resolved firmware {:?}", firmware);

    let login = connections.connect(address, password).await;
    if !login.success {
        anyhow::bail!(
            "Could not log in to {}: {}",
            address,
            login.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }

    print_info(&format!(
        "Installing {} on {} from {}",
        firmware.version, address, firmware.download_url
    ));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(progress) = rx.recv().await {
            println!("{}", format_progress(&progress));
        }
    });

    let orchestrator = UpgradeOrchestrator::new(connections, upgrade);
    let outcome = orchestrator
        .install_with_progress(address, &firmware, tx)
        .await;
    let _ = printer.await;

    if outcome.success {
        print_success(&format_outcome(&outcome));
        Ok(())
    } else {
        anyhow::bail!(format_outcome(&outcome))
    }
}

async fn resolve_firmware(
    choice: FirmwareChoice,
    config: ReleaseConfig,
) -> Result<FirmwareDescriptor> {
    let version = match choice {
        FirmwareChoice::Manual(descriptor) => return Ok(descriptor),
        FirmwareChoice::Release(version) => version,
    };

    let releases = ReleaseFeed::new(config)
        .fetch()
        .await
        .context("No firmware releases available")?;
    if let Releases::Fallback { reason, .. } = &releases {
        print_warning(&format!("Using configured fallback releases ({})", reason));
    }

    releases
        .find_version(&version)
        .cloned()
        .with_context(|| format!("Release {} not found", version))
}

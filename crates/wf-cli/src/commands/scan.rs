//! Scan command implementation

use std::sync::Arc;

use anyhow::{Context, Result};

use wf_connection::ConnectionManager;
use wf_core::config::DiscoveryConfig;
use wf_discovery::NetworkDiscoverer;

use crate::output::{format_devices, print_info};

/// Probe gateway positions and the configured subnets, plus any given here
pub async fn scan_command(
    connections: Arc<ConnectionManager>,
    mut config: DiscoveryConfig,
    extra_subnets: &[String],
    json: bool,
) -> Result<()> {
    config.subnets.extend(extra_subnets.iter().cloned());

    if !json {
        if config.subnets.is_empty() {
            print_info("Scanning gateway addresses of local interfaces...");
        } else {
            print_info(&format!(
                "Scanning gateway addresses and {}...",
                config.subnets.join(", ")
            ));
        }
    }

    let discoverer = NetworkDiscoverer::new(connections, config);
    let devices = discoverer
        .scan_network()
        .await
        .context("Cannot scan the requested subnets")?;
    tracing::info!("Scan found {} device(s)", devices.len());

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
    } else {
        println!("{}", format_devices(&devices));
    }
    Ok(())
}

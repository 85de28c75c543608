//! Check command implementation

use std::sync::Arc;

use anyhow::Result;

use wf_connection::ConnectionManager;
use wf_core::config::DiscoveryConfig;
use wf_core::types::Address;
use wf_discovery::NetworkDiscoverer;

use crate::output::format_devices;

/// Probe and identify one address
pub async fn check_command(
    connections: Arc<ConnectionManager>,
    config: DiscoveryConfig,
    address: Address,
) -> Result<()> {
    tracing::debug!("Checking {}", address);
    let discoverer = NetworkDiscoverer::new(connections, config);
    match discoverer.check_device(address).await {
        Some(device) => {
            println!("{}", format_devices(&[device]));
            Ok(())
        }
        None => anyhow::bail!("{} is not reachable over SSH", address),
    }
}

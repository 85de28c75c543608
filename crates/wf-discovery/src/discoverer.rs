//! Network discoverer
//!
//! Produces the candidate device list without the user knowing an address:
//!
//! 1. Probe gateway positions of local interfaces and the default route.
//! 2. Sweep each configured CIDR range, skipping addresses already probed.
//! 3. Log in to every address with an open SSH port and identify the board.
//!
//! Per-address failures are logged and skipped; a scan always returns
//! whatever it found.

use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;

use wf_connection::{read_board_info, ConnectionManager};
use wf_core::cidr::Cidr;
use wf_core::config::DiscoveryConfig;
use wf_core::error::DiscoveryError;
use wf_core::types::{Address, BoardInfo, DeviceProbe, ProbeOrigin};

use crate::gateway::{GatewaySource, SystemGateways};
use crate::probe::{PortProbe, TcpPortProbe};

/// Finds SSH-reachable devices and enriches them with board information
pub struct NetworkDiscoverer {
    /// Used to log in and identify reachable devices
    connections: Arc<ConnectionManager>,
    /// TCP reachability check
    prober: Arc<dyn PortProbe>,
    /// Gateway heuristics
    gateways: Arc<dyn GatewaySource>,
    config: DiscoveryConfig,
}

impl NetworkDiscoverer {
    /// Discoverer using real TCP probes and the system's interfaces
    pub fn new(connections: Arc<ConnectionManager>, config: DiscoveryConfig) -> Self {
        Self::with_parts(
            connections,
            Arc::new(TcpPortProbe),
            Arc::new(SystemGateways),
            config,
        )
    }

    /// Discoverer with injected probe and gateway source
    pub fn with_parts(
        connections: Arc<ConnectionManager>,
        prober: Arc<dyn PortProbe>,
        gateways: Arc<dyn GatewaySource>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            connections,
            prober,
            gateways,
            config,
        }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Scan using the configured subnets
    pub async fn scan_network(&self) -> Result<Vec<DeviceProbe>, DiscoveryError> {
        let subnets = parse_subnets(&self.config.subnets)?;
        Ok(self.scan(&subnets).await)
    }

    /// Scan gateway positions and then sweep `subnets`
    pub async fn scan(&self, subnets: &[Cidr]) -> Vec<DeviceProbe> {
        let mut probed: BTreeSet<Address> = BTreeSet::new();
        let mut devices = Vec::new();

        if self.config.include_gateways {
            let candidates: Vec<Address> = self
                .gateways
                .gateway_candidates()
                .await
                .into_iter()
                .filter(|address| probed.insert(*address))
                .collect();

            tracing::info!("Probing {} gateway candidates", candidates.len());
            devices.extend(self.probe_all(candidates, ProbeOrigin::Gateway).await);
        }

        for subnet in subnets {
            let hosts: Vec<Address> = subnet
                .hosts()
                .filter(|address| probed.insert(*address))
                .collect();

            tracing::info!("Sweeping {} ({} new addresses)", subnet, hosts.len());
            devices.extend(self.probe_all(hosts, ProbeOrigin::Subnet).await);
        }

        tracing::info!("Scan finished: {} device(s) with SSH", devices.len());
        devices
    }

    /// Probe and enrich a single, user-supplied address
    pub async fn check_device(&self, address: Address) -> Option<DeviceProbe> {
        if !self.is_ssh_open(address).await {
            tracing::info!("{} does not answer on port {}", address, self.config.ssh_port);
            return None;
        }
        Some(self.enrich(address, ProbeOrigin::Manual).await)
    }

    /// TCP-probe addresses concurrently, then enrich the open ones in order
    async fn probe_all(&self, addresses: Vec<Address>, origin: ProbeOrigin) -> Vec<DeviceProbe> {
        let concurrency = self.config.max_concurrent_probes.max(1);

        let mut open: Vec<Address> = stream::iter(addresses)
            .map(|address| async move { (address, self.is_ssh_open(address).await) })
            .buffer_unordered(concurrency)
            .filter_map(|(address, open)| async move { open.then_some(address) })
            .collect()
            .await;
        open.sort();

        let mut devices = Vec::with_capacity(open.len());
        for address in open {
            devices.push(self.enrich(address, origin).await);
        }
        devices
    }

    async fn is_ssh_open(&self, address: Address) -> bool {
        self.prober
            .is_open(address, self.config.ssh_port, self.config.probe_timeout)
            .await
    }

    /// Identify a device whose SSH port is open.
    ///
    /// Never drops the device: when login or identification fails it is
    /// still listed as ready, without board information.
    async fn enrich(&self, address: Address, origin: ProbeOrigin) -> DeviceProbe {
        let board = match self.identify(address).await {
            Ok(board) => board,
            Err(reason) => {
                tracing::warn!("Could not identify {}: {}", address, reason);
                None
            }
        };

        match &board {
            Some(info) => tracing::info!(
                "Found {} at {} ({} {})",
                info.board_name,
                address,
                info.distribution,
                info.os_version
            ),
            None => tracing::info!("Found unidentified SSH device at {}", address),
        }

        DeviceProbe::reachable(address, origin, board)
    }

    async fn identify(&self, address: Address) -> Result<Option<BoardInfo>, String> {
        // Reuse a session the user already opened, otherwise log in blank
        let owned_session = !self.connections.is_connected(address);
        if owned_session {
            let outcome = self.connections.connect(address, "").await;
            if !outcome.success {
                return Err(outcome.error.unwrap_or_else(|| "login failed".to_string()));
            }
        }

        let result = read_board_info(&self.connections, address)
            .await
            .map_err(|e| e.to_string());

        if owned_session {
            self.connections.close_connection(address).await;
        }
        result
    }
}

/// Validate every configured range before touching the network
pub fn parse_subnets(subnets: &[String]) -> Result<Vec<Cidr>, DiscoveryError> {
    subnets.iter().map(|s| s.parse::<Cidr>()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subnets() {
        let parsed = parse_subnets(&["192.168.1.0/24".into(), "10.0.0.0/30".into()]).unwrap();
        assert_eq!(parsed.len(), 2);

        let err = parse_subnets(&["192.168.1.0/24".into(), "10.0.0.0/8".into()]).unwrap_err();
        assert!(matches!(err, DiscoveryError::MaskOutOfRange { mask: 8, .. }));
    }
}

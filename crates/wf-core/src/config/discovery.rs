//! Network discovery configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_millis;

/// Settings for the network discoverer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Port probed to decide whether a device runs SSH
    pub ssh_port: u16,

    /// Raw TCP connect timeout per address
    #[serde(with = "duration_millis")]
    pub probe_timeout: Duration,

    /// CIDR ranges swept after the gateway heuristics, e.g. `192.168.1.0/24`
    pub subnets: Vec<String>,

    /// Probe interface gateway positions and the default route
    pub include_gateways: bool,

    /// Upper bound on simultaneous TCP probes
    pub max_concurrent_probes: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            ssh_port: 22,
            probe_timeout: Duration::from_millis(500),
            subnets: Vec::new(),
            include_gateways: true,
            max_concurrent_probes: 32,
        }
    }
}

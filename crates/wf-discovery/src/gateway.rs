//! Gateway heuristics for directly attached routers
//!
//! A router plugged straight into this machine is almost always sitting at
//! the first or last usable address of the interface's subnet, or is the
//! default route. These positions are probed before any subnet sweep.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};

use pnet::datalink;
use pnet::ipnetwork::IpNetwork;

use wf_core::cidr::gateway_candidates;
use wf_core::types::Address;

/// Supplies the addresses worth probing before a sweep
#[async_trait]
pub trait GatewaySource: Send + Sync {
    async fn gateway_candidates(&self) -> Vec<Address>;
}

/// Reads local interfaces and the OS routing table
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemGateways;

#[async_trait]
impl GatewaySource for SystemGateways {
    async fn gateway_candidates(&self) -> Vec<Address> {
        let mut candidates: BTreeSet<Address> = interface_candidates().into_iter().collect();
        candidates.extend(default_gateways().await);
        candidates.into_iter().collect()
    }
}

/// First and last usable address of every non-loopback IPv4 interface
pub fn interface_candidates() -> Vec<Address> {
    let mut candidates = Vec::new();

    for iface in datalink::interfaces() {
        if iface.is_loopback() || !iface.is_up() {
            continue;
        }
        for network in &iface.ips {
            let IpNetwork::V4(net) = network else {
                continue;
            };
            if net.ip().is_loopback() || net.ip().is_link_local() {
                continue;
            }
            let found = gateway_candidates(net.ip(), net.prefix());
            tracing::debug!(
                "Interface {} ({}/{}) gateway candidates: {:?}",
                iface.name,
                net.ip(),
                net.prefix(),
                found
            );
            candidates.extend(found);
        }
    }

    candidates
}

/// Gateways from the OS default route. Failures yield an empty list.
pub async fn default_gateways() -> Vec<Address> {
    #[cfg(target_os = "linux")]
    {
        if let Ok(table) = tokio::fs::read_to_string("/proc/net/route").await {
            let gateways = parse_proc_net_route(&table);
            if !gateways.is_empty() {
                return gateways;
            }
        }
    }

    let output = match route_command().output().await {
        Ok(output) => output,
        Err(e) => {
            tracing::debug!("Could not read default route: {}", e);
            return Vec::new();
        }
    };

    let gateways = parse_default_routes(&String::from_utf8_lossy(&output.stdout));
    tracing::debug!("Default route gateways: {:?}", gateways);
    gateways
}

fn route_command() -> tokio::process::Command {
    #[cfg(target_os = "windows")]
    {
        let mut command = tokio::process::Command::new("route");
        command.args(["print", "-4", "0.0.0.0"]);
        command
    }

    #[cfg(target_os = "macos")]
    {
        let mut command = tokio::process::Command::new("netstat");
        command.args(["-rn", "-f", "inet"]);
        command
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let mut command = tokio::process::Command::new("ip");
        command.args(["-4", "route", "show", "default"]);
        command
    }
}

/// Extract gateway addresses from `ip route`, `netstat -rn` or `route print`
/// output.
pub fn parse_default_routes(output: &str) -> Vec<Address> {
    let mut gateways = BTreeSet::new();

    for line in output.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let gateway = match tokens.as_slice() {
            // Linux: default via 192.168.1.1 dev eth0
            ["default", "via", gateway, ..] => *gateway,
            // BSD/macOS: default 192.168.1.1 UGScg en0
            ["default", gateway, ..] => *gateway,
            // Windows: 0.0.0.0 0.0.0.0 192.168.1.1 192.168.1.100 25
            ["0.0.0.0", "0.0.0.0", gateway, ..] => *gateway,
            _ => continue,
        };
        if let Ok(IpAddr::V4(ip)) = gateway.parse::<IpAddr>() {
            if !ip.is_unspecified() {
                gateways.insert(Address::new(ip));
            }
        }
    }

    gateways.into_iter().collect()
}

/// Parse the Linux `/proc/net/route` table, where addresses are
/// little-endian hex.
pub fn parse_proc_net_route(table: &str) -> Vec<Address> {
    let mut gateways = BTreeSet::new();

    for line in table.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [_iface, destination, gateway, ..] = fields.as_slice() else {
            continue;
        };
        if *destination != "00000000" {
            continue;
        }
        if let Ok(raw) = u32::from_str_radix(gateway, 16) {
            let ip = Ipv4Addr::from(raw.to_le_bytes());
            if !ip.is_unspecified() {
                gateways.insert(Address::new(ip));
            }
        }
    }

    gateways.into_iter().collect()
}

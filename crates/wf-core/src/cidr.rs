//! CIDR ranges for subnet sweeps

use pnet::ipnetwork::Ipv4Network;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::DiscoveryError;
use crate::types::Address;

/// Narrowest mask accepted for a sweep (65534 hosts)
pub const MIN_SWEEP_MASK: u8 = 16;
/// Widest mask accepted for a sweep (2 hosts)
pub const MAX_SWEEP_MASK: u8 = 30;

/// A validated IPv4 range with a mask between /16 and /30
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    network: Ipv4Network,
}

impl Cidr {
    /// Build a range from an address inside it and a mask length
    pub fn new(ip: Ipv4Addr, mask: u8) -> Result<Self, DiscoveryError> {
        let cidr = format!("{}/{}", ip, mask);
        if !(MIN_SWEEP_MASK..=MAX_SWEEP_MASK).contains(&mask) {
            return Err(DiscoveryError::MaskOutOfRange { cidr, mask });
        }
        let network =
            Ipv4Network::new(ip, mask).map_err(|_| DiscoveryError::InvalidCidr(cidr))?;
        Ok(Self { network })
    }

    pub fn mask(&self) -> u8 {
        self.network.prefix()
    }

    pub fn network_address(&self) -> Ipv4Addr {
        self.network.network()
    }

    pub fn broadcast_address(&self) -> Ipv4Addr {
        self.network.broadcast()
    }

    /// Number of usable host addresses
    pub fn host_count(&self) -> u32 {
        (1u32 << (32 - u32::from(self.mask()))) - 2
    }

    /// Every host address in the range, excluding network and broadcast
    pub fn hosts(&self) -> impl Iterator<Item = Address> {
        let first = u32::from(self.network_address()) + 1;
        let last = u32::from(self.broadcast_address()) - 1;
        (first..=last).map(|ip| Address::new(Ipv4Addr::from(ip)))
    }
}

impl FromStr for Cidr {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (ip, mask) = s
            .split_once('/')
            .ok_or_else(|| DiscoveryError::InvalidCidr(s.to_string()))?;
        let ip: Ipv4Addr = ip
            .parse()
            .map_err(|_| DiscoveryError::InvalidCidr(s.to_string()))?;
        let mask: u8 = mask
            .parse()
            .map_err(|_| DiscoveryError::InvalidCidr(s.to_string()))?;
        if mask > 32 {
            return Err(DiscoveryError::InvalidCidr(s.to_string()));
        }
        Self::new(ip, mask)
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network_address(), self.mask())
    }
}

/// Conventional gateway positions of an interface's subnet.
///
/// Returns the first usable address (network + 1) and the last usable
/// address (broadcast - 1). Point-to-point and host routes (/31, /32) have
/// no such positions.
pub fn gateway_candidates(ip: Ipv4Addr, prefix: u8) -> Vec<Address> {
    if prefix >= 31 {
        return Vec::new();
    }
    let Ok(network) = Ipv4Network::new(ip, prefix) else {
        return Vec::new();
    };
    let first = Address::new(Ipv4Addr::from(u32::from(network.network()) + 1));
    let last = Address::new(Ipv4Addr::from(u32::from(network.broadcast()) - 1));

    let mut candidates = vec![first];
    if last != first {
        candidates.push(last);
    }
    // Our own address is never the router we are looking for
    candidates.retain(|c| c.ip() != ip);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_count_matches_mask() {
        for mask in MIN_SWEEP_MASK..=MAX_SWEEP_MASK {
            let cidr = Cidr::new(Ipv4Addr::new(10, 20, 30, 40), mask).unwrap();
            let hosts: Vec<_> = cidr.hosts().collect();
            let expected = (1usize << (32 - mask as usize)) - 2;
            assert_eq!(hosts.len(), expected, "mask /{}", mask);
            assert_eq!(cidr.host_count() as usize, expected);
            assert!(!hosts.contains(&Address::new(cidr.network_address())));
            assert!(!hosts.contains(&Address::new(cidr.broadcast_address())));
        }
    }

    #[test]
    fn test_rejects_masks_outside_range() {
        for mask in [0u8, 8, 15, 31, 32] {
            let err = Cidr::new(Ipv4Addr::new(192, 168, 1, 0), mask).unwrap_err();
            assert!(matches!(err, DiscoveryError::MaskOutOfRange { .. }));
        }
        assert!(matches!(
            "192.168.1.0/33".parse::<Cidr>(),
            Err(DiscoveryError::InvalidCidr(_))
        ));
    }

    #[test]
    fn test_parse_normalizes_network() {
        let cidr: Cidr = "192.168.1.77/24".parse().unwrap();
        assert_eq!(cidr.to_string(), "192.168.1.0/24");
        assert_eq!(cidr.hosts().next(), Some("192.168.1.1".parse().unwrap()));
        assert_eq!(cidr.hosts().last(), Some("192.168.1.254".parse().unwrap()));
    }

    #[test]
    fn test_parse_garbage() {
        assert!("not-a-cidr".parse::<Cidr>().is_err());
        assert!("192.168.1.0".parse::<Cidr>().is_err());
        assert!("192.168.1.0/abc".parse::<Cidr>().is_err());
    }

    #[test]
    fn test_gateway_candidates() {
        let candidates = gateway_candidates(Ipv4Addr::new(192, 168, 8, 100), 24);
        assert_eq!(
            candidates,
            vec![
                "192.168.8.1".parse::<Address>().unwrap(),
                "192.168.8.254".parse::<Address>().unwrap()
            ]
        );

        // Host is itself the first usable address
        let candidates = gateway_candidates(Ipv4Addr::new(10, 0, 0, 1), 30);
        assert_eq!(candidates, vec!["10.0.0.2".parse::<Address>().unwrap()]);

        assert!(gateway_candidates(Ipv4Addr::new(10, 0, 0, 1), 32).is_empty());
    }
}

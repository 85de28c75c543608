//! wf-discovery: Local network discovery for wrtflash
//!
//! Finds routers reachable over SSH by combining gateway heuristics for
//! directly attached devices with optional subnet sweeps, and identifies each
//! one through the connection manager.

pub mod discoverer;
pub mod gateway;
pub mod probe;

pub use discoverer::{parse_subnets, NetworkDiscoverer};
pub use gateway::{GatewaySource, SystemGateways};
pub use probe::{PortProbe, TcpPortProbe};

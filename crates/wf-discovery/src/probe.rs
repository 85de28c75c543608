//! Raw TCP reachability probe

use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

use wf_core::types::Address;

/// Decides whether something is listening on a port.
///
/// Failures are never errors: a silent or refusing address simply is not a
/// candidate.
#[async_trait]
pub trait PortProbe: Send + Sync {
    async fn is_open(&self, address: Address, port: u16, timeout: Duration) -> bool;
}

/// Plain `connect()` with a deadline
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpPortProbe;

#[async_trait]
impl PortProbe for TcpPortProbe {
    async fn is_open(&self, address: Address, port: u16, probe_timeout: Duration) -> bool {
        let socket_addr = SocketAddr::new(address.ip().into(), port);

        match timeout(probe_timeout, TcpStream::connect(socket_addr)).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(e)) => {
                tracing::trace!("{} refused: {}", socket_addr, e);
                false
            }
            Err(_elapsed) => {
                tracing::trace!("{} timed out", socket_addr);
                false
            }
        }
    }
}

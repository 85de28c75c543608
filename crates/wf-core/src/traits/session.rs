//! Session traits

use async_trait::async_trait;
use std::time::Duration;

use crate::error::ConnectionError;
use crate::types::{Address, CommandOutput};

/// A live, authenticated channel to one device
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Run a command and collect its output.
    ///
    /// Returns `ConnectionError::Closed` when the server goes away before
    /// reporting an exit status.
    async fn exec(&self, command: &str) -> Result<CommandOutput, ConnectionError>;

    /// Whether the underlying transport is known to be gone
    fn is_closed(&self) -> bool;

    /// Tear the session down. Must be safe to call on a dead session.
    async fn close(&self);
}

/// Opens sessions to devices
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Connect and authenticate within `timeout`
    async fn open(
        &self,
        address: Address,
        password: &str,
        timeout: Duration,
    ) -> Result<Box<dyn RemoteSession>, ConnectionError>;
}

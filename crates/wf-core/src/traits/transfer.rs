//! File delivery trait

use async_trait::async_trait;
use std::path::Path;

use crate::error::TransferError;
use crate::types::Address;

/// Copies a local file onto a device.
///
/// Implementations must not rely on an SFTP subsystem; the embedded SSH
/// servers on target devices frequently lack one.
#[async_trait]
pub trait FileTransporter: Send + Sync {
    async fn transfer(
        &self,
        address: Address,
        local_path: &Path,
        remote_path: &str,
        password: Option<&str>,
    ) -> Result<(), TransferError>;
}

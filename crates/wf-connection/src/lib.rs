//! wf-connection: SSH session lifecycle for wrtflash
//!
//! The [`ConnectionManager`] is the only component that talks to devices.
//! It keeps at most one session per address, runs commands, delivers files
//! and polls devices back up after a reboot. Host-key verification is
//! disabled in [`ssh`], the single place that policy lives.

pub mod command;
pub mod device;
pub mod manager;
pub mod scp;
pub mod ssh;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use device::read_board_info;
pub use manager::ConnectionManager;
pub use scp::ScpTransporter;
pub use ssh::RusshSessionFactory;

use std::sync::Arc;
use wf_core::config::ConnectionConfig;

/// Connection manager wired to russh sessions and the system `scp`
pub fn connect_system(config: ConnectionConfig) -> ConnectionManager {
    let factory = Arc::new(RusshSessionFactory::new(&config));
    let transporter = Arc::new(ScpTransporter::new(config.clone()));
    ConnectionManager::new(factory, transporter, config)
}

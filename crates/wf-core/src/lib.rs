//! wf-core: Core types and configuration for wrtflash
//!
//! This crate holds the data model shared by the connection manager, the
//! network discoverer and the upgrade orchestrator, together with the error
//! taxonomy, configuration structures and the traits that separate the
//! components from their SSH and file-copy transports.

pub mod board;
pub mod cidr;
pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use cidr::Cidr;
pub use error::{ConnectionError, UpgradeError};
pub use types::{
    Address, BoardInfo, CommandOutput, ConnectOutcome, DeviceProbe, FirmwareDescriptor,
    ProbeOrigin, ProbeStatus, UpgradeOutcome, UpgradeProgress, UpgradeStage,
};

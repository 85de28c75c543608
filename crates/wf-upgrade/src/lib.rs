//! wf-upgrade: Firmware upgrade pipeline for wrtflash
//!
//! The [`UpgradeOrchestrator`] downloads an image, copies it to the device,
//! flashes it and waits for the device to come back on the new firmware.
//! [`ReleaseFeed`] supplies the firmware descriptors to choose from.

pub mod download;
pub mod feed;
pub mod orchestrator;

pub use download::{FirmwareFetcher, HttpDownloader};
pub use feed::{ReleaseFeed, Releases};
pub use orchestrator::UpgradeOrchestrator;

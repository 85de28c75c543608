//! CLI command implementations

mod check;
mod config;
mod connect;
mod install;
mod releases;
mod scan;

pub use check::check_command;
pub use config::{config_init, config_show};
pub use connect::connect_command;
pub use install::{install_command, FirmwareChoice};
pub use releases::releases_command;
pub use scan::scan_command;

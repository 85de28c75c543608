//! wrtflash: command-line front end
//!
//! Scans for routers, inspects them and drives firmware upgrades through the
//! `wf-*` library crates.

pub mod commands;
pub mod output;

//! Config command implementations

use std::path::Path;

use anyhow::{Context, Result};

use crate::output::{print_error, print_info, print_success, print_warning};
use wf_core::config::{self, AppConfig};

/// Show the effective configuration
pub fn config_show(path: &Path) -> Result<()> {
    if path.exists() {
        print_info(&format!("Configuration file: {:?}", path));
    } else {
        print_warning(&format!("No configuration file found at {:?}", path));
        print_info("Showing defaults; run 'wrtflash config init' to create one");
    }
    println!();

    let config = config::load_or_default(path)
        .with_context(|| format!("Failed to load config from {:?}", path))?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

/// Write the default configuration
pub fn config_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        print_error(&format!("Config file already exists: {:?}", path));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    config::save_config(path, &AppConfig::default())
        .with_context(|| format!("Failed to write config file: {:?}", path))?;
    print_success(&format!("Created configuration file: {:?}", path));
    Ok(())
}

//! Releases command implementation

use anyhow::{Context, Result};

use wf_core::config::ReleaseConfig;
use wf_upgrade::{ReleaseFeed, Releases};

use crate::output::{format_releases, print_warning};

/// List available firmware, optionally only for one board
pub async fn releases_command(config: ReleaseConfig, board: Option<&str>) -> Result<()> {
    let releases = ReleaseFeed::new(config)
        .fetch()
        .await
        .context("No firmware releases available")?;

    if let Releases::Fallback { reason, .. } = &releases {
        print_warning(&format!("Showing configured fallback releases ({})", reason));
    }

    let listed = match board {
        Some(board) => releases.for_board(board),
        None => releases.releases().iter().collect(),
    };
    let source = if releases.is_live() { "live" } else { "fallback" };
    tracing::info!(
        "Listing {} of {} {} release(s)",
        listed.len(),
        releases.releases().len(),
        source
    );
    println!("{}", format_releases(&listed, source));
    Ok(())
}

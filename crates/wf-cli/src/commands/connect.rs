//! Connect command implementation

use anyhow::Result;

use wf_connection::{read_board_info, ConnectionManager};
use wf_core::types::Address;

use crate::output::{print_info, print_success, print_warning};

/// Log in to a device and report what it is
pub async fn connect_command(
    connections: &ConnectionManager,
    address: Address,
    password: &str,
) -> Result<()> {
    let outcome = connections.connect(address, password).await;
    if !outcome.success {
        anyhow::bail!(
            "Could not log in to {}: {}",
            address,
            outcome.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    print_success(&format!("Logged in to {}", address));

    match read_board_info(connections, address).await {
        Ok(Some(board)) => {
            print_info(&format!("Board:   {}", board.board_name));
            print_info(&format!("Model:   {}", board.model));
            print_info(&format!(
                "Release: {} {}",
                board.distribution, board.os_version
            ));
            if !board.is_openwrt() {
                print_warning("Device does not report an OpenWrt distribution");
            }
        }
        Ok(None) => print_warning("Device did not report board information"),
        Err(e) => {
            tracing::debug!("Board query on {} failed: {}", address, e);
            print_warning(&format!("Could not read board information: {}", e))
        }
    }
    Ok(())
}

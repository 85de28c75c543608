//! Device identification over an SSH session

use wf_core::board::{parse_board_json, parse_release_text, BOARD_FALLBACK_QUERY, BOARD_QUERY};
use wf_core::error::ConnectionError;
use wf_core::types::{Address, BoardInfo};

use crate::manager::ConnectionManager;

/// Identify the board behind an address.
///
/// Tries the structured ubus query first and falls back to parsing
/// `/etc/openwrt_release`. Returns `Ok(None)` when the device answers but
/// neither query yields anything recognisable.
pub async fn read_board_info(
    manager: &ConnectionManager,
    address: Address,
) -> Result<Option<BoardInfo>, ConnectionError> {
    let output = manager.execute(address, BOARD_QUERY).await?;
    if output.success() {
        if let Some(info) = parse_board_json(&output.stdout) {
            tracing::debug!("{} identified as {} via ubus", address, info.board_name);
            return Ok(Some(info));
        }
    }

    tracing::debug!("ubus board query failed on {}, trying release file", address);
    let output = manager.execute(address, BOARD_FALLBACK_QUERY).await?;
    Ok(parse_release_text(&output.stdout))
}

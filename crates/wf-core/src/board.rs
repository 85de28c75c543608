//! Board identification parsing
//!
//! Devices are identified with `ubus call system board`, which prints JSON on
//! every OpenWrt release since 15.05. Older or stripped-down images lack ubus,
//! so a shell fallback prints `/etc/openwrt_release` plus a few `key=value`
//! lines that [`parse_release_text`] understands.

use serde::Deserialize;
use std::collections::HashMap;

use crate::types::BoardInfo;

/// Structured board identification query
pub const BOARD_QUERY: &str = "ubus call system board";

/// Plain-text fallback when ubus is unavailable
pub const BOARD_FALLBACK_QUERY: &str = "cat /etc/openwrt_release 2>/dev/null; \
echo \"board_name=$(cat /tmp/sysinfo/board_name 2>/dev/null)\"; \
echo \"model=$(cat /tmp/sysinfo/model 2>/dev/null)\"; \
echo \"hostname=$(cat /proc/sys/kernel/hostname 2>/dev/null)\"; \
echo \"arch=$(uname -m)\"";

#[derive(Debug, Deserialize)]
struct UbusBoard {
    #[serde(default)]
    hostname: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    board_name: String,
    #[serde(default)]
    release: Option<UbusRelease>,
}

#[derive(Debug, Deserialize)]
struct UbusRelease {
    #[serde(default)]
    distribution: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    target: String,
}

/// Parse the JSON printed by [`BOARD_QUERY`]
pub fn parse_board_json(output: &str) -> Option<BoardInfo> {
    let board: UbusBoard = serde_json::from_str(output.trim()).ok()?;
    let release = board.release.unwrap_or(UbusRelease {
        distribution: String::new(),
        version: String::new(),
        target: String::new(),
    });

    Some(BoardInfo {
        board_name: board.board_name,
        model: board.model,
        hostname: board.hostname,
        distribution: release.distribution,
        os_version: release.version,
        architecture: release.target,
    })
}

/// Parse the `KEY='value'` lines printed by [`BOARD_FALLBACK_QUERY`].
///
/// Returns `None` when the output carries neither a distribution nor a
/// board name.
pub fn parse_release_text(output: &str) -> Option<BoardInfo> {
    let values: HashMap<String, String> = output
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let value = value.trim().trim_matches(|c| c == '\'' || c == '"');
            (key.trim().to_ascii_lowercase(), value.to_string())
        })
        .collect();

    let get = |key: &str| values.get(key).cloned().unwrap_or_default();

    let info = BoardInfo {
        board_name: get("board_name"),
        model: get("model"),
        hostname: get("hostname"),
        distribution: get("distrib_id"),
        os_version: get("distrib_release"),
        architecture: values
            .get("distrib_arch")
            .filter(|a| !a.is_empty())
            .cloned()
            .unwrap_or_else(|| get("arch")),
    };

    if info.distribution.is_empty() && info.board_name.is_empty() {
        None
    } else {
        Some(info)
    }
}

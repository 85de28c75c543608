//! Output formatting utilities for the CLI
//!
//! Tables for discovered devices and releases, one-line progress reports for
//! running upgrades, and colored status messages.

use tabled::{settings::Style, Table, Tabled};

use wf_core::types::{DeviceProbe, FirmwareDescriptor, UpgradeOutcome, UpgradeProgress};

/// Format discovered devices as a table
///
/// Devices whose board could not be read still get a row, with `-` in the
/// board columns.
pub fn format_devices(devices: &[DeviceProbe]) -> String {
    if devices.is_empty() {
        return "No devices found".to_string();
    }

    #[derive(Tabled)]
    struct DeviceRow {
        #[tabled(rename = "ADDRESS")]
        address: String,
        #[tabled(rename = "FOUND VIA")]
        origin: String,
        #[tabled(rename = "STATUS")]
        status: String,
        #[tabled(rename = "OPENWRT")]
        openwrt: String,
        #[tabled(rename = "BOARD")]
        board: String,
        #[tabled(rename = "MODEL")]
        model: String,
        #[tabled(rename = "VERSION")]
        version: String,
    }

    let rows: Vec<DeviceRow> = devices
        .iter()
        .map(|d| {
            let board = d.board.as_ref();
            let field = |value: Option<&String>| {
                value
                    .filter(|v| !v.is_empty())
                    .cloned()
                    .unwrap_or_else(|| "-".to_string())
            };
            DeviceRow {
                address: d.address.to_string(),
                origin: d.origin.to_string(),
                status: d.status.to_string(),
                openwrt: if d.is_openwrt { "yes" } else { "no" }.to_string(),
                board: field(board.map(|b| &b.board_name)),
                model: field(board.map(|b| &b.model)),
                version: field(board.map(|b| &b.os_version)),
            }
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format firmware descriptors with the source they came from
pub fn format_releases(releases: &[&FirmwareDescriptor], source: &str) -> String {
    if releases.is_empty() {
        return "No matching releases".to_string();
    }

    #[derive(Tabled)]
    struct ReleaseRow {
        #[tabled(rename = "VERSION")]
        version: String,
        #[tabled(rename = "ARCH")]
        arch: String,
        #[tabled(rename = "DEVICES")]
        devices: String,
        #[tabled(rename = "SOURCE")]
        source: String,
        #[tabled(rename = "URL")]
        url: String,
    }

    let rows: Vec<ReleaseRow> = releases
        .iter()
        .map(|r| ReleaseRow {
            version: r.version.clone(),
            arch: if r.architecture.is_empty() {
                "-".to_string()
            } else {
                r.architecture.clone()
            },
            devices: if r.supported_devices.is_empty() {
                "any".to_string()
            } else {
                r.supported_devices.join(", ")
            },
            source: source.to_string(),
            url: truncate(&r.download_url, 60),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// One line per progress event
pub fn format_progress(progress: &UpgradeProgress) -> String {
    format!(
        "[{:>3}%] {:<22} {}",
        progress.progress_percent,
        progress.stage.as_str(),
        progress.message
    )
}

/// Terminal result of an upgrade
pub fn format_outcome(outcome: &UpgradeOutcome) -> String {
    match &outcome.error {
        None => format!("Upgrade {} ({}%)", outcome.stage, outcome.progress_percent),
        Some(error) => format!(
            "Upgrade failed at {} ({}%): {}",
            outcome.stage, outcome.progress_percent, error
        ),
    }
}

/// Truncate a string with ellipsis if too long
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix, to stderr
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow, to stderr
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

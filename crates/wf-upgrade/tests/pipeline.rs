//! Upgrade pipeline integration tests
//!
//! Every run goes through a fake device, a fake copy transport and a fetcher
//! that writes a fixed image. Time is paused so reboot waits finish at once.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use wf_connection::mock::{FakeDevice, FakeSessionFactory, FakeTransporter, Reply};
use wf_connection::ConnectionManager;
use wf_core::board::BOARD_QUERY;
use wf_core::config::{ConnectionConfig, UpgradeConfig};
use wf_core::error::{ConnectionError, DownloadError};
use wf_core::types::{Address, FirmwareDescriptor, UpgradeStage};
use wf_upgrade::download::ProgressFn;
use wf_upgrade::{FirmwareFetcher, UpgradeOrchestrator};

const IMAGE: &[u8] = b"sysupgrade image for board X";
const MARKER: &str = "/etc/openwrt_version";

fn addr(s: &str) -> Address {
    s.parse().unwrap()
}

/// Writes [`IMAGE`] in two halves, or fails when told to
#[derive(Default)]
struct FakeFetcher {
    fail: bool,
    calls: AtomicUsize,
}

impl FakeFetcher {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FirmwareFetcher for FakeFetcher {
    async fn fetch(
        &self,
        _url: &str,
        destination: &Path,
        on_progress: ProgressFn<'_>,
    ) -> Result<u64, DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(DownloadError::Status(503));
        }

        let total = IMAGE.len() as u64;
        on_progress(total / 2, Some(total));
        tokio::fs::write(destination, IMAGE).await.unwrap();
        on_progress(total, Some(total));
        Ok(total)
    }
}

struct Harness {
    factory: Arc<FakeSessionFactory>,
    transporter: Arc<FakeTransporter>,
    manager: Arc<ConnectionManager>,
    scratch: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        let factory = Arc::new(FakeSessionFactory::new());
        let transporter = Arc::new(FakeTransporter::new());
        let manager = Arc::new(ConnectionManager::new(
            Arc::clone(&factory) as _,
            Arc::clone(&transporter) as _,
            ConnectionConfig::default(),
        ));
        Self {
            factory,
            transporter,
            manager,
            scratch: tempfile::tempdir().unwrap(),
        }
    }

    fn add(&self, device: &Arc<FakeDevice>) {
        self.factory.add(Arc::clone(device));
        self.transporter.add(Arc::clone(device));
    }

    fn config(&self) -> UpgradeConfig {
        UpgradeConfig {
            scratch_dir: self.scratch.path().join("images"),
            reboot_poll_attempts: 5,
            reboot_poll_interval: Duration::from_secs(5),
            ..UpgradeConfig::default()
        }
    }

    fn orchestrator(&self, fetcher: Arc<FakeFetcher>) -> UpgradeOrchestrator {
        self.orchestrator_with(fetcher, self.config())
    }

    fn orchestrator_with(&self, fetcher: Arc<FakeFetcher>, config: UpgradeConfig) -> UpgradeOrchestrator {
        UpgradeOrchestrator::with_fetcher(Arc::clone(&self.manager), fetcher, config)
    }

    fn scratch_files(&self) -> usize {
        match std::fs::read_dir(self.scratch.path().join("images")) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }
}

fn firmware_for(board: &str) -> FirmwareDescriptor {
    FirmwareDescriptor {
        supported_devices: vec![board.to_string()],
        ..FirmwareDescriptor::new("23.05.2", "https://downloads.example.invalid/x-sysupgrade.bin")
    }
}

/// OpenWrt device that reboots on `sysupgrade` and comes back with a new marker
fn flashable(address: Address, board: &str) -> Arc<FakeDevice> {
    let device = FakeDevice::openwrt(address, board);
    device.on("sysupgrade", Reply::Reboot { downtime_attempts: 3 });
    device.put_file(MARKER, "r22.03.0\n");
    device.after_reboot_file(MARKER, "r23.05.2\n");
    device
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_with_password() {
    let harness = Harness::new();
    let device = flashable(addr("192.168.1.1"), "X");
    device.set_passwords(&["p"]);
    harness.add(&device);

    assert!(!harness.manager.connect(device.address(), "").await.success);
    assert!(harness.manager.connect(device.address(), "p").await.success);

    let fetcher = Arc::new(FakeFetcher::default());
    let outcome = harness
        .orchestrator(Arc::clone(&fetcher))
        .install(device.address(), &firmware_for("X"))
        .await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.stage, UpgradeStage::Complete);
    assert_eq!(outcome.progress_percent, 100);
    assert_eq!(outcome.error, None);

    assert_eq!(fetcher.calls(), 1);
    assert_eq!(device.reboots(), 1);
    assert_eq!(
        harness.transporter.transfers(),
        vec![(device.address(), "/tmp/firmware.bin".to_string())]
    );
    assert!(device
        .commands()
        .iter()
        .any(|c| c == "sysupgrade -n '/tmp/firmware.bin'"));
    assert_eq!(harness.scratch_files(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_progress_stream_is_ordered_and_monotonic() {
    let harness = Harness::new();
    let device = flashable(addr("192.168.1.1"), "glinet,gl-mt300n-v2");
    harness.add(&device);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let outcome = harness
        .orchestrator(Arc::new(FakeFetcher::default()))
        .install_with_progress(device.address(), &firmware_for("gl-mt300n-v2"), tx)
        .await;
    assert!(outcome.success, "{:?}", outcome.error);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    assert!(events
        .windows(2)
        .all(|w| w[0].progress_percent <= w[1].progress_percent && w[0].stage <= w[1].stage));

    let stages: Vec<UpgradeStage> = events.iter().map(|e| e.stage).collect();
    for stage in [
        UpgradeStage::Preparing,
        UpgradeStage::CompatibilityCheck,
        UpgradeStage::DownloadPreparation,
        UpgradeStage::Downloading,
        UpgradeStage::Transferring,
        UpgradeStage::Verifying,
        UpgradeStage::Installing,
        UpgradeStage::WaitingForReboot,
        UpgradeStage::VerifyingInstallation,
        UpgradeStage::Complete,
    ] {
        assert!(stages.contains(&stage), "missing {}", stage);
    }

    // Halfway through the download is reported between 15 and 40
    assert!(events
        .iter()
        .any(|e| e.stage == UpgradeStage::Downloading && e.progress_percent == 27));
    assert_eq!(events.last().unwrap().progress_percent, 100);
}

#[tokio::test(start_paused = true)]
async fn test_missing_distribution_fails_compatibility_at_zero() {
    let harness = Harness::new();
    let device = FakeDevice::new(addr("192.168.1.1"));
    device.on(
        BOARD_QUERY,
        Reply::stdout(r#"{"board_name":"X","model":"Unknown"}"#),
    );
    harness.add(&device);

    let fetcher = Arc::new(FakeFetcher::default());
    let outcome = harness
        .orchestrator(Arc::clone(&fetcher))
        .install(device.address(), &firmware_for("X"))
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.stage, UpgradeStage::CompatibilityCheck);
    assert_eq!(outcome.progress_percent, 0);
    assert!(outcome.error.unwrap().contains("distribution"));
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unidentifiable_device_fails_compatibility() {
    let harness = Harness::new();
    let device = FakeDevice::new(addr("192.168.1.1"));
    harness.add(&device);

    let outcome = harness
        .orchestrator(Arc::new(FakeFetcher::default()))
        .install(device.address(), &FirmwareDescriptor::new("1", "https://x.invalid/fw.bin"))
        .await;

    assert_eq!(outcome.stage, UpgradeStage::CompatibilityCheck);
    assert_eq!(outcome.progress_percent, 0);
}

#[tokio::test(start_paused = true)]
async fn test_missing_board_name_fails_compatibility() {
    let harness = Harness::new();
    let device = FakeDevice::openwrt(addr("192.168.1.1"), "");
    harness.add(&device);

    let outcome = harness
        .orchestrator(Arc::new(FakeFetcher::default()))
        .install(device.address(), &FirmwareDescriptor::new("1", "https://x.invalid/fw.bin"))
        .await;

    assert_eq!(outcome.stage, UpgradeStage::CompatibilityCheck);
    assert_eq!(outcome.progress_percent, 0);
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_board_fails_compatibility() {
    let harness = Harness::new();
    let device = flashable(addr("192.168.1.1"), "glinet,gl-ar300m");
    harness.add(&device);

    let outcome = harness
        .orchestrator(Arc::new(FakeFetcher::default()))
        .install(device.address(), &firmware_for("archer-c7-v5"))
        .await;

    assert_eq!(outcome.stage, UpgradeStage::CompatibilityCheck);
    assert_eq!(outcome.progress_percent, 0);
    assert!(outcome.error.unwrap().contains("glinet,gl-ar300m"));
    assert_eq!(device.reboots(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_closed_connection_while_installing_is_expected() {
    let harness = Harness::new();
    let device = FakeDevice::openwrt(addr("192.168.1.1"), "X");
    device.on(
        "sysupgrade",
        Reply::Fail(ConnectionError::Closed("connection reset by peer".into())),
    );
    device.put_file(MARKER, "r23.05.2");
    harness.add(&device);

    let firmware = FirmwareDescriptor {
        version_marker: Some("r23.05.2".into()),
        ..firmware_for("X")
    };
    let (tx, mut rx) = mpsc::unbounded_channel();
    let outcome = harness
        .orchestrator(Arc::new(FakeFetcher::default()))
        .install_with_progress(device.address(), &firmware, tx)
        .await;

    assert!(outcome.success, "{:?}", outcome.error);
    let mut reached_wait = false;
    while let Some(event) = rx.recv().await {
        reached_wait |= event.stage == UpgradeStage::WaitingForReboot;
    }
    assert!(reached_wait);
}

#[tokio::test(start_paused = true)]
async fn test_other_connection_error_while_installing_is_fatal() {
    let harness = Harness::new();
    let device = FakeDevice::openwrt(addr("192.168.1.1"), "X");
    device.on(
        "sysupgrade",
        Reply::Fail(ConnectionError::Ssh("channel open failure".into())),
    );
    harness.add(&device);

    let outcome = harness
        .orchestrator(Arc::new(FakeFetcher::default()))
        .install(device.address(), &firmware_for("X"))
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.stage, UpgradeStage::Installing);
    assert_eq!(outcome.progress_percent, 70);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_image_fails_installing() {
    let harness = Harness::new();
    let device = FakeDevice::openwrt(addr("192.168.1.1"), "X");
    device.on("sysupgrade", Reply::exit(1, "Image check 'platform_check_image' failed."));
    harness.add(&device);

    let outcome = harness
        .orchestrator(Arc::new(FakeFetcher::default()))
        .install(device.address(), &firmware_for("X"))
        .await;

    assert_eq!(outcome.stage, UpgradeStage::Installing);
    assert!(outcome.error.unwrap().contains("platform_check_image"));
    assert_eq!(device.reboots(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_reboot_timeout() {
    let harness = Harness::new();
    let device = FakeDevice::openwrt(addr("192.168.1.1"), "X");
    device.on("sysupgrade", Reply::Reboot { downtime_attempts: 1_000 });
    harness.add(&device);

    let config = UpgradeConfig {
        reboot_poll_attempts: 3,
        ..harness.config()
    };
    let start = tokio::time::Instant::now();
    let outcome = harness
        .orchestrator_with(Arc::new(FakeFetcher::default()), config)
        .install(device.address(), &firmware_for("X"))
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.stage, UpgradeStage::WaitingForReboot);
    assert_eq!(outcome.progress_percent, 80);
    assert!(outcome.error.unwrap().contains("3 attempts"));

    // Budget is attempts x interval, not one interval more
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(15), "{:?}", elapsed);
    assert!(elapsed < Duration::from_secs(20), "{:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_transfer_failure() {
    let harness = Harness::new();
    let device = flashable(addr("192.168.1.1"), "X");
    harness.add(&device);
    harness.transporter.fail_with("lost connection");

    let outcome = harness
        .orchestrator(Arc::new(FakeFetcher::default()))
        .install(device.address(), &firmware_for("X"))
        .await;

    assert_eq!(outcome.stage, UpgradeStage::Transferring);
    assert_eq!(outcome.progress_percent, 45);
    assert_eq!(device.reboots(), 0);
    assert_eq!(harness.scratch_files(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_missing_remote_file_fails_verifying() {
    let harness = Harness::new();
    let device = flashable(addr("192.168.1.1"), "X");
    device.on("ls", Reply::exit(1, "ls: /tmp/firmware.bin: No such file or directory"));
    harness.add(&device);

    let outcome = harness
        .orchestrator(Arc::new(FakeFetcher::default()))
        .install(device.address(), &firmware_for("X"))
        .await;

    assert_eq!(outcome.stage, UpgradeStage::Verifying);
    assert_eq!(outcome.progress_percent, 60);
    assert_eq!(device.reboots(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_truncated_remote_file_fails_verifying() {
    let harness = Harness::new();
    let device = flashable(addr("192.168.1.1"), "X");
    device.on(
        "ls",
        Reply::stdout("-rw-r--r--    1 root     root            12 Jan  1 00:03 /tmp/firmware.bin\n"),
    );
    harness.add(&device);

    let outcome = harness
        .orchestrator(Arc::new(FakeFetcher::default()))
        .install(device.address(), &firmware_for("X"))
        .await;

    assert_eq!(outcome.stage, UpgradeStage::Verifying);
    assert!(outcome.error.unwrap().contains("expected"));
}

#[tokio::test(start_paused = true)]
async fn test_download_failure() {
    let harness = Harness::new();
    let device = flashable(addr("192.168.1.1"), "X");
    harness.add(&device);

    let outcome = harness
        .orchestrator(Arc::new(FakeFetcher::failing()))
        .install(device.address(), &firmware_for("X"))
        .await;

    assert_eq!(outcome.stage, UpgradeStage::Downloading);
    assert_eq!(outcome.progress_percent, 15);
    assert!(harness.transporter.transfers().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_checksum_mismatch_fails_downloading() {
    let harness = Harness::new();
    let device = flashable(addr("192.168.1.1"), "X");
    harness.add(&device);

    let firmware = FirmwareDescriptor {
        sha256: Some("00".repeat(32)),
        ..firmware_for("X")
    };
    let outcome = harness
        .orchestrator(Arc::new(FakeFetcher::default()))
        .install(device.address(), &firmware)
        .await;

    assert_eq!(outcome.stage, UpgradeStage::Downloading);
    assert!(outcome.error.unwrap().contains("Checksum"));
    assert_eq!(harness.scratch_files(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_url_fails_download_preparation() {
    let harness = Harness::new();
    let device = flashable(addr("192.168.1.1"), "X");
    harness.add(&device);

    let fetcher = Arc::new(FakeFetcher::default());
    let firmware = FirmwareDescriptor {
        download_url: "not a url".into(),
        ..firmware_for("X")
    };
    let outcome = harness
        .orchestrator(Arc::clone(&fetcher))
        .install(device.address(), &firmware)
        .await;

    assert_eq!(outcome.stage, UpgradeStage::DownloadPreparation);
    assert_eq!(outcome.progress_percent, 10);
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_missing_marker_fails_verifying_installation() {
    let harness = Harness::new();
    let device = FakeDevice::openwrt(addr("192.168.1.1"), "X");
    device.on("sysupgrade", Reply::Reboot { downtime_attempts: 2 });
    harness.add(&device);

    let outcome = harness
        .orchestrator(Arc::new(FakeFetcher::default()))
        .install(device.address(), &firmware_for("X"))
        .await;

    assert_eq!(outcome.stage, UpgradeStage::VerifyingInstallation);
    assert_eq!(outcome.progress_percent, 95);
    assert!(outcome.error.unwrap().contains(MARKER));
}

#[tokio::test(start_paused = true)]
async fn test_unexpected_marker_fails_verifying_installation() {
    let harness = Harness::new();
    let device = flashable(addr("192.168.1.1"), "X");
    harness.add(&device);

    let firmware = FirmwareDescriptor {
        version_marker: Some("r24.10.0".into()),
        ..firmware_for("X")
    };
    let outcome = harness
        .orchestrator(Arc::new(FakeFetcher::default()))
        .install(device.address(), &firmware)
        .await;

    assert_eq!(outcome.stage, UpgradeStage::VerifyingInstallation);
    assert!(outcome.error.unwrap().contains("r24.10.0"));
}

#[tokio::test(start_paused = true)]
async fn test_unchanged_marker_fails_verifying_installation() {
    let harness = Harness::new();
    let device = FakeDevice::openwrt(addr("192.168.1.1"), "X");
    device.put_file(MARKER, "r22.03.0-old\n");
    device.on("sysupgrade", Reply::Reboot { downtime_attempts: 2 });
    harness.add(&device);

    let outcome = harness
        .orchestrator(Arc::new(FakeFetcher::default()))
        .install(device.address(), &firmware_for("X"))
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.stage, UpgradeStage::VerifyingInstallation);
    assert_eq!(outcome.progress_percent, 95);
    assert!(outcome.error.unwrap().contains("r22.03.0-old"));
    assert_eq!(device.reboots(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_expected_marker_accepts_reinstall_of_same_build() {
    let harness = Harness::new();
    let device = FakeDevice::openwrt(addr("192.168.1.1"), "X");
    device.put_file(MARKER, "r23.05.2\n");
    device.on("sysupgrade", Reply::Reboot { downtime_attempts: 2 });
    harness.add(&device);

    let firmware = FirmwareDescriptor {
        version_marker: Some("r23.05.2".into()),
        ..firmware_for("X")
    };
    let outcome = harness
        .orchestrator(Arc::new(FakeFetcher::default()))
        .install(device.address(), &firmware)
        .await;

    assert!(outcome.success, "{:?}", outcome.error);
}

#[tokio::test(start_paused = true)]
async fn test_password_cleared_by_flash() {
    let harness = Harness::new();
    let device = flashable(addr("192.168.1.1"), "X");
    device.set_passwords(&["secret"]);
    device.reset_password_on_reboot(true);
    harness.add(&device);

    assert!(harness.manager.connect(device.address(), "secret").await.success);

    let outcome = harness
        .orchestrator(Arc::new(FakeFetcher::default()))
        .install(device.address(), &firmware_for("X"))
        .await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(harness.manager.remembered_password(device.address()), Some(String::new()));
}

#[tokio::test(start_paused = true)]
async fn test_runs_on_different_devices_share_one_manager() {
    let harness = Harness::new();
    let first = flashable(addr("192.168.1.1"), "X");
    let second = flashable(addr("192.168.8.1"), "X");
    harness.add(&first);
    harness.add(&second);

    let orchestrator = harness.orchestrator(Arc::new(FakeFetcher::default()));
    let firmware = firmware_for("X");
    let (a, b) = tokio::join!(
        orchestrator.install(first.address(), &firmware),
        orchestrator.install(second.address(), &firmware),
    );

    assert!(a.success, "{:?}", a.error);
    assert!(b.success, "{:?}", b.error);
    assert_eq!(first.max_concurrent_sessions(), 1);
    assert_eq!(second.max_concurrent_sessions(), 1);
}

//! Common test utilities for the tether crate.
//!
//! - `init_test_logging`: route `tracing` output through the test harness
//! - `eventually`: poll a condition (works with paused and real time)
//! - `fast_settings`: acquisition settings with short intervals
//! - `Harness`: a `CameraService` over a `MockGateway` and a `RecordingSink`
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tether::acquisition::{AcquisitionMode, AcquisitionSettings, CameraService, FileWait, ReconnectPolicy};
use tether::camera::mock::MockGateway;
use tether::events::RecordingSink;
use tracing_subscriber::EnvFilter;

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `condition` every 5ms until it holds or `timeout` elapses.
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Settings tuned for fast real-time tests.
pub fn fast_settings(dir: &Path, mode: AcquisitionMode) -> AcquisitionSettings {
    AcquisitionSettings {
        mode,
        download_dir: dir.to_path_buf(),
        poll_interval: Duration::from_millis(50),
        reconnect: ReconnectPolicy::Fixed(Duration::from_millis(50)),
        file_wait: FileWait {
            attempts: 10,
            interval: Duration::from_millis(20),
        },
        stop_grace: Duration::from_millis(200),
        ..AcquisitionSettings::default()
    }
}

/// A service wired to a mock gateway and a recording sink.
pub struct Harness {
    pub dir: TempDir,
    pub mock: Arc<MockGateway>,
    pub sink: Arc<RecordingSink>,
    pub service: CameraService<MockGateway>,
}

impl Harness {
    pub fn new(mock: MockGateway, mode: AcquisitionMode) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let settings = fast_settings(dir.path(), mode);
        Self::with_settings(dir, mock, settings)
    }

    pub fn with_settings(dir: TempDir, mock: MockGateway, settings: AcquisitionSettings) -> Self {
        init_test_logging();
        let mock = Arc::new(mock);
        let sink = Arc::new(RecordingSink::new());
        let service = CameraService::new(Arc::clone(&mock), settings, sink.clone());
        Self {
            dir,
            mock,
            sink,
            service,
        }
    }

    pub fn download_dir(&self) -> &Path {
        self.dir.path()
    }

    /// Wait until a `status` event with `connected: true` was published.
    pub async fn wait_connected(&self) -> bool {
        let sink = Arc::clone(&self.sink);
        eventually(Duration::from_secs(60), || {
            sink.states().last().is_some_and(|s| s.is_connected())
        })
        .await
    }
}

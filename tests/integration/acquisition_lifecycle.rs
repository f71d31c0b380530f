//! Connection lifecycle of `CameraService` against `MockGateway`.
//!
//! These run with tokio's paused clock, so multi-second reconnect delays
//! complete instantly while keeping their ordering.

use std::time::Duration;

use tether::acquisition::{AcquisitionMode, AcquisitionSettings, ConnectionState, ReconnectPolicy};
use tether::camera::mock::{CANON_FOLDER, MockGateway, Operation};
use tether::error::TetherError;
use tether::events::ErrorKind;
use tokio::time::Instant;

use crate::common::{Harness, eventually};

fn with_policy(mock: MockGateway, policy: ReconnectPolicy) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let settings = AcquisitionSettings {
        mode: AcquisitionMode::Tethered,
        download_dir: dir.path().to_path_buf(),
        reconnect: policy,
        ..AcquisitionSettings::default()
    };
    Harness::with_settings(dir, mock, settings)
}

#[tokio::test(start_paused = true)]
async fn test_absent_camera_connects_after_it_appears() {
    let mock = MockGateway::canon();
    mock.script_presence(&[false, false, false, true]);
    let h = with_policy(mock, ReconnectPolicy::Fixed(Duration::from_secs(3)));

    let started = Instant::now();
    h.service.start().await.unwrap();
    assert!(h.wait_connected().await);

    assert!(started.elapsed() >= Duration::from_secs(9));
    assert_eq!(
        h.sink.states(),
        [ConnectionState::Connecting, ConnectionState::Connected]
    );
    assert_eq!(h.mock.presence_checks(), 4);
    assert_eq!(h.mock.tether_count(), 1);
    assert_eq!(h.service.reconnect_attempts(), 0);
    assert!(!h.service.has_pending_reconnect());

    h.service.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_exponential_backoff_applied() {
    let mock = MockGateway::canon();
    mock.script_presence(&[false, false, false, true]);
    let h = with_policy(
        mock,
        ReconnectPolicy::Exponential {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
        },
    );

    let started = Instant::now();
    h.service.start().await.unwrap();
    assert!(h.wait_connected().await);

    // 1s + 2s + 4s
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(7), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(9), "elapsed {elapsed:?}");

    h.service.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_listener_crash_disconnects_and_reconnects() {
    let h = with_policy(MockGateway::canon(), ReconnectPolicy::Fixed(Duration::from_secs(3)));
    h.service.start().await.unwrap();
    assert!(h.wait_connected().await);

    h.mock.tether(0).unwrap().exit(Some(1));

    let sink = h.sink.clone();
    assert!(
        eventually(Duration::from_secs(1), || {
            sink.states().last() == Some(&ConnectionState::Disconnected)
        })
        .await
    );
    assert!(h.service.has_pending_reconnect());
    assert!(!h.service.status().connected);

    let mock = h.mock.clone();
    assert!(eventually(Duration::from_secs(10), || mock.tether_count() == 2).await);
    assert!(h.wait_connected().await);

    assert_eq!(
        h.sink.states(),
        [
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
        ]
    );

    h.service.stop().await;
    assert!(h.mock.tether(1).unwrap().is_stopped());
    assert!(!h.mock.tether(0).unwrap().is_stopped());
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_pending_reconnect() {
    let mock = MockGateway::canon();
    mock.set_present(false);
    let h = with_policy(mock, ReconnectPolicy::Fixed(Duration::from_secs(3)));

    h.service.start().await.unwrap();
    assert!(h.service.has_pending_reconnect());
    assert_eq!(h.mock.presence_checks(), 1);

    h.service.stop().await;
    assert!(!h.service.has_pending_reconnect());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.mock.presence_checks(), 1);
    assert_eq!(h.sink.states(), [ConnectionState::Disconnected]);
}

#[tokio::test(start_paused = true)]
async fn test_stop_before_start_is_safe() {
    let h = with_policy(MockGateway::canon(), ReconnectPolicy::default());

    h.service.stop().await;
    h.service.stop().await;

    assert_eq!(
        h.sink.states(),
        [ConnectionState::Disconnected, ConnectionState::Disconnected]
    );
    assert!(h.mock.operations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stop_terminates_listener_and_reports_disconnected() {
    let h = with_policy(MockGateway::canon(), ReconnectPolicy::default());
    h.service.start().await.unwrap();
    assert!(h.wait_connected().await);

    h.service.stop().await;

    assert!(h.mock.latest_tether().unwrap().is_stopped());
    assert_eq!(h.mock.count(|op| matches!(op, Operation::StopTethered)), 1);
    assert_eq!(h.sink.states().last(), Some(&ConnectionState::Disconnected));
    assert!(!h.service.has_pending_reconnect());

    // The requested exit must not trigger a reconnect.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.mock.tether_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_spawn_failure_reports_error_then_retries() {
    let mock = MockGateway::canon();
    mock.fail_next_spawn(TetherError::CommandSpawn {
        program: "gphoto2".into(),
        reason: "No such file or directory".into(),
    });
    let h = with_policy(mock, ReconnectPolicy::Fixed(Duration::from_secs(3)));

    h.service.start().await.unwrap();
    assert_eq!(
        h.sink.states(),
        [ConnectionState::Connecting, ConnectionState::Error]
    );
    let errors = h.sink.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, ErrorKind::Spawn);

    assert!(h.wait_connected().await);
    assert_eq!(
        h.sink.states(),
        [
            ConnectionState::Connecting,
            ConnectionState::Error,
            ConnectionState::Connecting,
            ConnectionState::Connected,
        ]
    );

    h.service.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_status_events_only_on_change() {
    let mock = MockGateway::canon();
    mock.script_presence(&[false, false, false, false, false, true]);
    let h = with_policy(mock, ReconnectPolicy::Fixed(Duration::from_secs(1)));

    h.service.start().await.unwrap();
    assert!(h.wait_connected().await);

    let states = h.sink.states();
    assert!(states.windows(2).all(|w| w[0] != w[1]), "repeated state in {states:?}");

    h.service.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_capture_target_set_before_listener() {
    let dir = tempfile::tempdir().unwrap();
    let settings = AcquisitionSettings {
        download_dir: dir.path().to_path_buf(),
        capture_target: Some("1".to_string()),
        ..AcquisitionSettings::default()
    };
    let h = Harness::with_settings(dir, MockGateway::canon(), settings);

    h.service.start().await.unwrap();
    assert!(h.wait_connected().await);

    let ops = h.mock.operations();
    let set = ops
        .iter()
        .position(|op| {
            *op == Operation::SetConfig {
                key: "capturetarget".into(),
                value: "1".into(),
            }
        })
        .expect("capture target applied");
    let spawn = ops
        .iter()
        .position(|op| matches!(op, Operation::StartTethered { .. }))
        .expect("listener started");
    assert!(set < spawn);

    h.service.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_missing_dcim_does_not_block_tethered_mode() {
    let mock = MockGateway::new();
    mock.set_folders("/", &["store_00010001"]);
    mock.set_folders("/store_00010001", &["MISC"]);
    let h = with_policy(mock, ReconnectPolicy::default());

    h.service.start().await.unwrap();
    assert!(h.wait_connected().await);
    assert_eq!(h.service.status().folder, None);

    h.service.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_status_snapshot() {
    let h = with_policy(MockGateway::canon(), ReconnectPolicy::default());
    let before = h.service.status();
    assert!(!before.connected);
    assert_eq!(before.state, ConnectionState::Disconnected);

    h.service.start().await.unwrap();
    assert!(h.wait_connected().await);
    h.service.pause();

    let status = h.service.status();
    assert!(status.connected);
    assert_eq!(status.state, ConnectionState::Connected);
    assert!(status.paused);
    assert_eq!(status.folder.as_deref(), Some(CANON_FOLDER));
    assert_eq!(status.queued, 0);
    assert!(!status.reconnect_pending);

    h.service.resume();
    assert!(!h.service.is_paused());
    h.service.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_discovery_issues_no_further_work() {
    let mock = MockGateway::canon();
    mock.set_folder_latency(Duration::from_secs(2));
    let dir = tempfile::tempdir().unwrap();
    let settings = AcquisitionSettings {
        download_dir: dir.path().to_path_buf(),
        capture_target: Some("1".to_string()),
        ..AcquisitionSettings::default()
    };
    let h = Harness::with_settings(dir, mock, settings);

    let service = h.service.clone();
    let starting = tokio::spawn(async move { service.start().await });
    let mock = h.mock.clone();
    assert!(
        eventually(Duration::from_secs(5), || {
            mock.count(|op| matches!(op, Operation::ListFolders { .. })) > 0
        })
        .await
    );

    h.service.stop().await;
    let issued = h.mock.operations().len();

    starting.await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;

    let ops = h.mock.operations();
    assert_eq!(ops.len(), issued, "issued after stop: {:?}", &ops[issued..]);
    assert!(
        !ops.iter()
            .any(|op| matches!(op, Operation::SetConfig { .. } | Operation::StartTethered { .. }))
    );
    assert_eq!(h.mock.tether_count(), 0);
    assert_eq!(h.service.state(), ConnectionState::Disconnected);
    assert!(!h.service.has_pending_reconnect());
    assert_eq!(
        h.sink.states().last(),
        Some(&ConnectionState::Disconnected)
    );
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_poll_discovery_starts_no_poller() {
    let mock = MockGateway::canon();
    mock.set_folder_latency(Duration::from_secs(2));
    let dir = tempfile::tempdir().unwrap();
    let settings = AcquisitionSettings {
        mode: AcquisitionMode::Poll,
        download_dir: dir.path().to_path_buf(),
        ..AcquisitionSettings::default()
    };
    let h = Harness::with_settings(dir, mock, settings);

    let service = h.service.clone();
    let starting = tokio::spawn(async move { service.start().await });
    let mock = h.mock.clone();
    assert!(
        eventually(Duration::from_secs(5), || {
            mock.count(|op| matches!(op, Operation::ListFolders { .. })) > 0
        })
        .await
    );

    h.service.stop().await;
    starting.await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(h.mock.count(|op| matches!(op, Operation::ListFiles { .. })), 0);
    assert!(!h.service.status().connected);
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_stop() {
    let h = with_policy(MockGateway::canon(), ReconnectPolicy::default());

    h.service.start().await.unwrap();
    assert!(h.wait_connected().await);
    h.service.stop().await;

    h.service.start().await.unwrap();
    assert!(h.wait_connected().await);
    assert_eq!(h.mock.tether_count(), 2);

    h.service.stop().await;
}

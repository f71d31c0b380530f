//! Configuration files through to acquisition settings.

use std::time::Duration;

use tether::acquisition::{AcquisitionMode, ReconnectPolicy};
use tether::config::{load_config, parse_config};
use tether::error::TetherError;

#[test]
fn test_full_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[camera]
binary = "/opt/gphoto2/bin/gphoto2"
mode = "poll"
poll_interval_ms = 1500
capture_target = "1"

[reconnect]
policy = "exponential"
delay_ms = 1000
max_delay_ms = 20000

[storage]
download_dir = "booth-photos"
extensions = ["JPG", ".jpeg", "heic"]
public_prefix = "/media/booth"
skip_existing = false

[server]
bind = "0.0.0.0"
port = 9090
"#,
    )
    .unwrap();

    let loaded = load_config(Some(&path)).unwrap();
    let config = &loaded.config;
    assert_eq!(config.server.address(), "0.0.0.0:9090");

    let settings = config.acquisition_settings(&loaded.resolver).unwrap();
    assert_eq!(settings.mode, AcquisitionMode::Poll);
    assert_eq!(settings.poll_interval, Duration::from_millis(1500));
    assert_eq!(settings.capture_target.as_deref(), Some("1"));
    assert_eq!(settings.extensions, ["jpg", "jpeg", "heic"]);
    assert_eq!(settings.public_prefix, "/media/booth");
    assert!(!settings.skip_existing);
    assert_eq!(
        settings.reconnect,
        ReconnectPolicy::Exponential {
            base: Duration::from_secs(1),
            max: Duration::from_secs(20),
        }
    );

    // Relative to the config file, not the working directory.
    let expected = temp.path().canonicalize().unwrap().join("booth-photos");
    assert_eq!(settings.download_dir, expected);

    let gateway = config.gateway_settings();
    assert_eq!(gateway.program, "/opt/gphoto2/bin/gphoto2");
}

#[test]
fn test_home_relative_download_dir() {
    let config = parse_config("[storage]\ndownload_dir = \"~/Pictures/booth\"").unwrap();
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(&path, "").unwrap();
    let loaded = load_config(Some(&path)).unwrap();

    let settings = config.acquisition_settings(&loaded.resolver).unwrap();
    let home = dirs::home_dir().unwrap();
    assert_eq!(settings.download_dir, home.join("Pictures/booth"));
}

#[test]
fn test_invalid_values_rejected() {
    for (text, field) in [
        ("[camera]\npresence_timeout_ms = 0", "presence_timeout_ms"),
        ("[reconnect]\ndelay_ms = 5000\nmax_delay_ms = 1000", "max_delay_ms"),
        ("[storage]\nextensions = []", "extensions"),
        ("[storage]\npublic_prefix = \"photos\"", "public_prefix"),
    ] {
        match parse_config(text) {
            Err(TetherError::ConfigInvalid(message)) => {
                assert!(message.contains(field), "{message} should mention {field}");
            }
            other => panic!("expected invalid config for {field}, got {other:?}"),
        }
    }
}

#[test]
fn test_wrong_types_are_parse_errors() {
    assert!(matches!(
        parse_config("[server]\nport = \"eighty\""),
        Err(TetherError::ConfigParse(_))
    ));
    assert!(matches!(
        parse_config("[reconnect]\npolicy = \"random\""),
        Err(TetherError::ConfigParse(_))
    ));
}

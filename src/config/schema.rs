//! Configuration file schema.
//!
//! ```toml
//! [camera]
//! binary = "gphoto2"
//! mode = "tethered"          # or "poll"
//! capture_target = "1"       # optional
//!
//! [reconnect]
//! policy = "fixed"           # or "exponential"
//! delay_ms = 3000
//!
//! [storage]
//! download_dir = "~/Pictures/tether"
//! extensions = ["jpg", "jpeg"]
//!
//! [server]
//! port = 8420
//! ```
//!
//! Every field has a default, so an empty file is a valid configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::path::PathResolver;
use crate::acquisition::{AcquisitionMode, AcquisitionSettings, BackoffKind, FileWait, ReconnectPolicy};
use crate::camera::GatewaySettings;
use crate::error::{Result, TetherError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TetherConfig {
    pub camera: CameraSection,
    pub reconnect: ReconnectSection,
    pub storage: StorageSection,
    pub server: ServerSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CameraSection {
    /// gphoto2 executable, looked up on `PATH` unless absolute.
    pub binary: String,
    pub mode: AcquisitionMode,
    pub presence_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub command_timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_target: Option<String>,
    pub stop_grace_ms: u64,
}

impl Default for CameraSection {
    fn default() -> Self {
        Self {
            binary: "gphoto2".to_string(),
            mode: AcquisitionMode::Tethered,
            presence_timeout_ms: 5000,
            poll_interval_ms: 2000,
            command_timeout_ms: 30_000,
            capture_target: None,
            stop_grace_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconnectSection {
    pub policy: BackoffKind,
    pub delay_ms: u64,
    /// Ceiling for exponential backoff.
    pub max_delay_ms: u64,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            policy: BackoffKind::Fixed,
            delay_ms: 3000,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageSection {
    pub download_dir: PathBuf,
    pub extensions: Vec<String>,
    pub public_prefix: String,
    pub file_wait_attempts: u32,
    pub file_wait_interval_ms: u64,
    pub skip_existing: bool,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("~/Pictures/tether"),
            extensions: vec!["jpg".to_string(), "jpeg".to_string()],
            public_prefix: "/photos".to_string(),
            file_wait_attempts: 10,
            file_wait_interval_ms: 100,
            skip_existing: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8420,
        }
    }
}

impl ServerSection {
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

impl TetherConfig {
    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::ConfigInvalid`] naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        trace!("Validating configuration");

        let non_zero = [
            ("camera.presence_timeout_ms", self.camera.presence_timeout_ms),
            ("camera.poll_interval_ms", self.camera.poll_interval_ms),
            ("camera.command_timeout_ms", self.camera.command_timeout_ms),
            ("reconnect.delay_ms", self.reconnect.delay_ms),
            ("storage.file_wait_interval_ms", self.storage.file_wait_interval_ms),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(invalid(format!("{field} must be greater than zero")));
            }
        }

        if self.storage.file_wait_attempts == 0 {
            return Err(invalid("storage.file_wait_attempts must be at least 1"));
        }
        if self.reconnect.max_delay_ms < self.reconnect.delay_ms {
            return Err(invalid(format!(
                "reconnect.max_delay_ms ({}) must not be below reconnect.delay_ms ({})",
                self.reconnect.max_delay_ms, self.reconnect.delay_ms
            )));
        }
        if self.camera.binary.trim().is_empty() {
            return Err(invalid("camera.binary must not be empty"));
        }
        if self.storage.extensions.iter().all(|e| e.trim().is_empty()) {
            return Err(invalid("storage.extensions must list at least one extension"));
        }
        if !self.storage.public_prefix.starts_with('/') {
            return Err(invalid("storage.public_prefix must start with '/'"));
        }
        Ok(())
    }

    /// Extensions without leading dots, lowercased.
    pub fn normalized_extensions(&self) -> Vec<String> {
        self.storage
            .extensions
            .iter()
            .map(|e| e.trim().trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect()
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(
            self.reconnect.policy,
            Duration::from_millis(self.reconnect.delay_ms),
            Duration::from_millis(self.reconnect.max_delay_ms),
        )
    }

    /// Settings for the acquisition core, with `download_dir` resolved.
    pub fn acquisition_settings(&self, resolver: &PathResolver) -> Result<AcquisitionSettings> {
        Ok(AcquisitionSettings {
            mode: self.camera.mode,
            download_dir: resolver.resolve(&self.storage.download_dir)?,
            extensions: self.normalized_extensions(),
            public_prefix: self.storage.public_prefix.clone(),
            poll_interval: Duration::from_millis(self.camera.poll_interval_ms),
            reconnect: self.reconnect_policy(),
            file_wait: FileWait {
                attempts: self.storage.file_wait_attempts,
                interval: Duration::from_millis(self.storage.file_wait_interval_ms),
            },
            capture_target: self.camera.capture_target.clone(),
            stop_grace: Duration::from_millis(self.camera.stop_grace_ms),
            skip_existing: self.storage.skip_existing,
        })
    }

    pub fn gateway_settings(&self) -> GatewaySettings {
        GatewaySettings {
            program: self.camera.binary.clone(),
            base_args: Vec::new(),
            presence_timeout: Duration::from_millis(self.camera.presence_timeout_ms),
            command_timeout: Duration::from_millis(self.camera.command_timeout_ms),
            stop_grace: Duration::from_millis(self.camera.stop_grace_ms),
        }
    }
}

fn invalid(message: impl Into<String>) -> TetherError {
    TetherError::ConfigInvalid(message.into())
}

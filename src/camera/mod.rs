//! Device command gateway for tethered cameras.
//!
//! The [`CameraGateway`] trait abstracts over the real gphoto2-backed
//! implementation and the in-memory mock, so the acquisition state machine
//! can be exercised without hardware.
//!
//! # Implementation Notes
//!
//! - Gateways never retry; reconnection policy belongs to the caller
//! - Folder paths are absolute device paths (`/store_00010001/DCIM/100CANON`)
//! - File identifiers are device file names, stable within one connection

mod discovery;
mod gphoto;
pub mod mock;
pub mod parse;
mod tether;

pub use discovery::{FolderDiscovery, discover_photo_folder};
pub use gphoto::{GatewaySettings, GphotoGateway};
pub use parse::DetectedCamera;
pub use tether::{TetherExit, TetherOutput, TetherProcess, TetherStop, TetherWiring, tether_channel};

use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

/// A file stored on the camera, as reported by a folder listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DeviceFile {
    /// 1-based position in the folder listing (used by get-file).
    pub index: u32,
    /// File name on the device; the download identifier.
    pub name: String,
}

/// Discrete camera operations.
///
/// Every method maps to one invocation of the external control tool.
#[async_trait]
pub trait CameraGateway: Send + Sync + 'static {
    /// Check whether a camera is attached.
    ///
    /// Resolves to `false` on timeout, on any failure, and when another
    /// presence check is still outstanding. Never spawns overlapping checks.
    async fn check_presence(&self) -> bool;

    /// List the direct child folders of `parent`.
    async fn list_folders(&self, parent: &str) -> Result<Vec<String>>;

    /// List the files in `folder`.
    async fn list_files(&self, folder: &str) -> Result<Vec<DeviceFile>>;

    /// Transfer `file` from `folder` into the local path `dest`.
    async fn get_file(&self, folder: &str, file: &DeviceFile, dest: &Path) -> Result<()>;

    /// Set a camera configuration value (e.g. `capturetarget`).
    async fn set_config(&self, key: &str, value: &str) -> Result<()>;

    /// Spawn the long-lived tethered listener saving captures into `target_dir`.
    async fn start_tethered(&self, target_dir: &Path) -> Result<TetherProcess>;
}

//! Download pipeline: transfers one identifier to a unique local path and
//! verifies the file landed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::camera::{CameraGateway, DeviceFile};
use crate::error::{Result, TetherError};

/// A photo that has been written to local storage. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapturedPhoto {
    /// Name of the file on the camera.
    pub device_filename: String,
    /// Name of the file in the download directory.
    pub local_filename: String,
    pub local_path: PathBuf,
    /// Path under which the presentation layer serves the file.
    pub public_path: String,
}

/// Bounded wait for a file to appear with non-zero size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileWait {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for FileWait {
    fn default() -> Self {
        Self {
            attempts: 10,
            interval: Duration::from_millis(100),
        }
    }
}

impl FileWait {
    /// Poll `path` until it exists and is non-empty.
    pub async fn wait_for(&self, path: &Path) -> Result<()> {
        for attempt in 1..=self.attempts.max(1) {
            match tokio::fs::metadata(path).await {
                Ok(meta) if meta.is_file() && meta.len() > 0 => {
                    debug!(path = %path.display(), attempt, "File is ready");
                    return Ok(());
                }
                _ => {
                    if attempt < self.attempts {
                        tokio::time::sleep(self.interval).await;
                    }
                }
            }
        }

        Err(TetherError::FileNotReady {
            path: path.display().to_string(),
        })
    }
}

/// Local filename for a device file: the device stem plus a timestamp, so
/// repeated downloads of the same name never collide.
pub fn local_filename(device_name: &str, now: DateTime<Local>) -> String {
    let stamp = now.format("%Y%m%d_%H%M%S_%3f");
    match device_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}_{stamp}.{}", ext.to_lowercase()),
        _ => format!("{device_name}_{stamp}"),
    }
}

/// Turns pending identifiers into local files.
#[derive(Debug, Clone)]
pub struct DownloadPipeline {
    dest_dir: PathBuf,
    public_prefix: String,
    wait: FileWait,
}

impl DownloadPipeline {
    pub fn new(dest_dir: impl Into<PathBuf>, public_prefix: impl Into<String>, wait: FileWait) -> Self {
        Self {
            dest_dir: dest_dir.into(),
            public_prefix: public_prefix.into().trim_end_matches('/').to_string(),
            wait,
        }
    }

    pub fn dest_dir(&self) -> &Path {
        &self.dest_dir
    }

    fn photo(&self, device_filename: &str, local_filename: String) -> CapturedPhoto {
        CapturedPhoto {
            device_filename: device_filename.to_string(),
            local_path: self.dest_dir.join(&local_filename),
            public_path: format!("{}/{local_filename}", self.public_prefix),
            local_filename,
        }
    }

    /// Pull `file` from the camera into the download directory.
    #[instrument(skip(self, gateway, file), fields(file = %file.name))]
    pub async fn download<G: CameraGateway + ?Sized>(
        &self,
        gateway: &G,
        folder: &str,
        file: &DeviceFile,
    ) -> Result<CapturedPhoto> {
        let photo = self.photo(&file.name, local_filename(&file.name, Local::now()));
        gateway.get_file(folder, file, &photo.local_path).await?;
        self.wait.wait_for(&photo.local_path).await?;
        info!(local = %photo.local_filename, "Downloaded photo");
        Ok(photo)
    }

    /// Wait for a file the tethered listener reported as saved.
    #[instrument(skip(self))]
    pub async fn collect_tethered(&self, filename: &str) -> Result<CapturedPhoto> {
        let photo = self.photo(filename, filename.to_string());
        self.wait.wait_for(&photo.local_path).await?;
        Ok(photo)
    }
}

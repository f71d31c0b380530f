//! Photo folder discovery.
//!
//! Walks `/` → `store_XXXXXXXX` → `DCIM` → `<number><suffix>` and keeps the
//! result until a path-related failure invalidates it.

use std::sync::{Mutex, PoisonError};

use tracing::{debug, info, instrument};

use super::CameraGateway;
use super::parse::{find_dcim, find_storage_root, join_folder, select_photo_folder};
use crate::error::{Result, TetherError};

/// Walk the device folder tree and return the active photo folder.
///
/// Any failing step (gateway error or no matching entry) is an error; callers
/// treat it as "cannot proceed yet", never as fatal.
#[instrument(skip(gateway))]
pub async fn discover_photo_folder<G: CameraGateway + ?Sized>(gateway: &G) -> Result<String> {
    let roots = gateway.list_folders("/").await?;
    let root = find_storage_root(&roots)
        .ok_or(TetherError::FolderNotFound {
            level: "storage root",
        })?
        .to_string();
    let root = join_folder("/", &root);
    debug!(root = %root, "Found storage root");

    let children = gateway.list_folders(&root).await?;
    let dcim = find_dcim(&children)
        .ok_or(TetherError::FolderNotFound { level: "DCIM" })?
        .to_string();
    let dcim = join_folder(&root, &dcim);
    debug!(dcim = %dcim, "Found DCIM folder");

    let photo_folders = gateway.list_folders(&dcim).await?;
    let folder = select_photo_folder(&photo_folders)
        .ok_or(TetherError::FolderNotFound {
            level: "photo folder",
        })?
        .to_string();

    Ok(join_folder(&dcim, &folder))
}

/// Memoized photo folder location.
#[derive(Debug, Default)]
pub struct FolderDiscovery {
    cached: Mutex<Option<String>>,
}

impl FolderDiscovery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently cached folder, if any.
    pub fn cached(&self) -> Option<String> {
        self.cached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drop the cached folder, forcing rediscovery on next use.
    pub fn invalidate(&self) {
        let previous = self
            .cached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(folder) = previous {
            debug!(folder = %folder, "Invalidated cached photo folder");
        }
    }

    /// Return the cached folder or discover and cache it.
    pub async fn resolve<G: CameraGateway + ?Sized>(&self, gateway: &G) -> Result<String> {
        if let Some(folder) = self.cached() {
            return Ok(folder);
        }

        let folder = discover_photo_folder(gateway).await?;
        info!(folder = %folder, "Discovered photo folder");
        *self.cached.lock().unwrap_or_else(PoisonError::into_inner) = Some(folder.clone());
        Ok(folder)
    }
}

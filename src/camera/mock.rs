//! Mock camera gateway for testing.
//!
//! Records every operation and lets tests script presence, folder trees,
//! file listings, transfer failures and the tethered listener's output.
//!
//! # Example
//!
//! ```rust,ignore
//! use tether::camera::mock::{MockGateway, Operation};
//!
//! let mock = MockGateway::canon();
//! mock.script_presence(&[false, true]);
//! mock.add_file("/store_00010001/DCIM/100CANON", "IMG_0001.JPG");
//!
//! // ... drive a CameraService ...
//!
//! let tether = mock.tether(0).unwrap();
//! tether.emit("Saving file as IMG_0001.JPG");
//! tether.exit(Some(1));
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::tether::{TetherExit, TetherOutput, TetherProcess, tether_channel};
use super::{CameraGateway, DeviceFile};
use crate::error::{Result, TetherError};

/// Folder layout of a typical Canon body.
pub const CANON_ROOT: &str = "/store_00010001";
pub const CANON_DCIM: &str = "/store_00010001/DCIM";
pub const CANON_FOLDER: &str = "/store_00010001/DCIM/100CANON";

/// Recorded operation for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    CheckPresence,
    ListFolders { parent: String },
    ListFiles { folder: String },
    GetFile { folder: String, name: String, dest: PathBuf },
    SetConfig { key: String, value: String },
    StartTethered { target_dir: PathBuf },
    StopTethered,
}

/// Test-side handle to one spawned mock listener.
#[derive(Debug, Clone)]
pub struct MockTether {
    output: mpsc::UnboundedSender<TetherOutput>,
    stopped: Arc<AtomicBool>,
}

impl MockTether {
    /// Emit one line of listener output.
    pub fn emit(&self, line: &str) {
        let _ = self.output.send(TetherOutput::Line(line.to_string()));
    }

    /// Simulate the listener exiting on its own.
    pub fn exit(&self, code: Option<i32>) {
        let _ = self.output.send(TetherOutput::Exited(TetherExit::crashed(code)));
    }

    /// True once the service asked this listener to stop.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock gateway for testing without a camera.
#[derive(Debug)]
pub struct MockGateway {
    presence_script: Mutex<VecDeque<bool>>,
    present: AtomicBool,
    presence_busy: AtomicBool,
    presence_latency: Mutex<Duration>,
    list_latency: Mutex<Duration>,
    folder_latency: Mutex<Duration>,
    folders: Mutex<HashMap<String, Vec<String>>>,
    files: Mutex<HashMap<String, Vec<DeviceFile>>>,
    failing_lists: Mutex<usize>,
    failing_downloads: Mutex<HashSet<String>>,
    storage_full: AtomicBool,
    spawn_error: Mutex<Option<TetherError>>,
    tethers: Mutex<Vec<MockTether>>,
    operation_log: Arc<Mutex<Vec<Operation>>>,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    /// Empty camera: present, no folders.
    #[must_use]
    pub fn new() -> Self {
        Self {
            presence_script: Mutex::new(VecDeque::new()),
            present: AtomicBool::new(true),
            presence_busy: AtomicBool::new(false),
            presence_latency: Mutex::new(Duration::ZERO),
            list_latency: Mutex::new(Duration::ZERO),
            folder_latency: Mutex::new(Duration::ZERO),
            folders: Mutex::new(HashMap::new()),
            files: Mutex::new(HashMap::new()),
            failing_lists: Mutex::new(0),
            failing_downloads: Mutex::new(HashSet::new()),
            storage_full: AtomicBool::new(false),
            spawn_error: Mutex::new(None),
            tethers: Mutex::new(Vec::new()),
            operation_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Camera with `/store_00010001/DCIM/100CANON` and no files.
    #[must_use]
    pub fn canon() -> Self {
        let mock = Self::new();
        mock.set_folders("/", &["store_00010001"]);
        mock.set_folders(CANON_ROOT, &["DCIM", "MISC"]);
        mock.set_folders(CANON_DCIM, &["100CANON"]);
        mock
    }

    // === Configuration ===

    /// Presence results returned by the next checks, in order. Once the
    /// script is exhausted the value from [`set_present`](Self::set_present)
    /// is used.
    pub fn script_presence(&self, results: &[bool]) {
        lock(&self.presence_script).extend(results.iter().copied());
    }

    pub fn set_present(&self, present: bool) {
        self.present.store(present, Ordering::SeqCst);
    }

    pub fn set_presence_latency(&self, latency: Duration) {
        *lock(&self.presence_latency) = latency;
    }

    pub fn set_list_latency(&self, latency: Duration) {
        *lock(&self.list_latency) = latency;
    }

    /// Delay applied to every folder listing, i.e. each discovery step.
    pub fn set_folder_latency(&self, latency: Duration) {
        *lock(&self.folder_latency) = latency;
    }

    pub fn set_folders(&self, parent: &str, children: &[&str]) {
        lock(&self.folders).insert(
            parent.to_string(),
            children.iter().map(|c| (*c).to_string()).collect(),
        );
    }

    /// Append a file to `folder`, numbered after the existing ones.
    pub fn add_file(&self, folder: &str, name: &str) {
        let mut files = lock(&self.files);
        let entries = files.entry(folder.to_string()).or_default();
        let index = u32::try_from(entries.len()).unwrap_or(u32::MAX).saturating_add(1);
        entries.push(DeviceFile {
            index,
            name: name.to_string(),
        });
    }

    /// Fail the next `count` list-files calls.
    pub fn fail_next_lists(&self, count: usize) {
        *lock(&self.failing_lists) = count;
    }

    /// Make every download of `name` fail.
    pub fn fail_download(&self, name: &str) {
        lock(&self.failing_downloads).insert(name.to_string());
    }

    /// Make downloads fail with a storage-full error.
    pub fn set_storage_full(&self, full: bool) {
        self.storage_full.store(full, Ordering::SeqCst);
    }

    /// Make the next tethered spawn fail.
    pub fn fail_next_spawn(&self, error: TetherError) {
        *lock(&self.spawn_error) = Some(error);
    }

    // === Inspection ===

    pub fn operations(&self) -> Vec<Operation> {
        lock(&self.operation_log).clone()
    }

    pub fn clear_operations(&self) {
        lock(&self.operation_log).clear();
    }

    /// Number of recorded operations matching `pred`.
    pub fn count(&self, pred: impl Fn(&Operation) -> bool) -> usize {
        lock(&self.operation_log).iter().filter(|op| pred(op)).count()
    }

    pub fn presence_checks(&self) -> usize {
        self.count(|op| matches!(op, Operation::CheckPresence))
    }

    pub fn downloads_of(&self, name: &str) -> usize {
        self.count(|op| matches!(op, Operation::GetFile { name: n, .. } if n == name))
    }

    pub fn tether_count(&self) -> usize {
        lock(&self.tethers).len()
    }

    /// Handle to the `n`th spawned listener.
    pub fn tether(&self, n: usize) -> Option<MockTether> {
        lock(&self.tethers).get(n).cloned()
    }

    pub fn latest_tether(&self) -> Option<MockTether> {
        lock(&self.tethers).last().cloned()
    }

    fn record(&self, op: Operation) {
        trace!(?op, "Mock operation");
        lock(&self.operation_log).push(op);
    }
}

#[async_trait]
impl CameraGateway for MockGateway {
    async fn check_presence(&self) -> bool {
        if self.presence_busy.swap(true, Ordering::SeqCst) {
            debug!("Mock presence check already in flight");
            return false;
        }
        self.record(Operation::CheckPresence);

        let latency = *lock(&self.presence_latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let scripted = lock(&self.presence_script).pop_front();
        let present = scripted.unwrap_or_else(|| self.present.load(Ordering::SeqCst));
        self.presence_busy.store(false, Ordering::SeqCst);
        present
    }

    async fn list_folders(&self, parent: &str) -> Result<Vec<String>> {
        self.record(Operation::ListFolders {
            parent: parent.to_string(),
        });

        let latency = *lock(&self.folder_latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        lock(&self.folders)
            .get(parent)
            .cloned()
            .ok_or_else(|| TetherError::CommandFailed {
                operation: "list-folders".to_string(),
                code: Some(1),
                output: format!("*** Error: Directory '{parent}' not found ***"),
            })
    }

    async fn list_files(&self, folder: &str) -> Result<Vec<DeviceFile>> {
        self.record(Operation::ListFiles {
            folder: folder.to_string(),
        });

        let latency = *lock(&self.list_latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        {
            let mut failing = lock(&self.failing_lists);
            if *failing > 0 {
                *failing -= 1;
                return Err(TetherError::CommandFailed {
                    operation: "list-files".to_string(),
                    code: Some(1),
                    output: "*** Error: I/O in progress ***".to_string(),
                });
            }
        }

        Ok(lock(&self.files).get(folder).cloned().unwrap_or_default())
    }

    async fn get_file(&self, folder: &str, file: &DeviceFile, dest: &Path) -> Result<()> {
        self.record(Operation::GetFile {
            folder: folder.to_string(),
            name: file.name.clone(),
            dest: dest.to_path_buf(),
        });

        if self.storage_full.load(Ordering::SeqCst) {
            return Err(TetherError::StorageFull("PTP Store Full".to_string()));
        }
        if lock(&self.failing_downloads).contains(&file.name) {
            return Err(TetherError::Transfer {
                file: file.name.clone(),
                reason: "mock transfer failure".to_string(),
            });
        }

        tokio::fs::write(dest, format!("mock image {}", file.name)).await?;
        Ok(())
    }

    async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        self.record(Operation::SetConfig {
            key: key.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    async fn start_tethered(&self, target_dir: &Path) -> Result<TetherProcess> {
        self.record(Operation::StartTethered {
            target_dir: target_dir.to_path_buf(),
        });

        if let Some(error) = lock(&self.spawn_error).take() {
            return Err(error);
        }

        let (wiring, process) = tether_channel();
        let handle = MockTether {
            output: wiring.output.clone(),
            stopped: Arc::new(AtomicBool::new(false)),
        };

        // Answer a stop request the way the real supervisor does.
        let stopped = Arc::clone(&handle.stopped);
        let log = Arc::clone(&self.operation_log);
        let output = wiring.output;
        let stop = wiring.stop;
        tokio::spawn(async move {
            if stop.await.is_ok() {
                stopped.store(true, Ordering::SeqCst);
                lock(&log).push(Operation::StopTethered);
                let _ = output.send(TetherOutput::Exited(TetherExit::stopped(Some(0))));
            }
        });

        lock(&self.tethers).push(handle);
        Ok(process)
    }
}

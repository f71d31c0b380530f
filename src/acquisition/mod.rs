//! Camera acquisition state machine.
//!
//! [`CameraService`] owns the connection state, the reconnect timer, the
//! tethered listener or poll loop, and the per-session download ledger.
//! It publishes `status`, `photo` and `error` events to an [`EventSink`]
//! and never lets a failure escape: every failure path ends in a state
//! transition, a scheduled reconnect, or an `error` event.
//!
//! ```text
//! Disconnected ──presence ok──▶ Connecting ──listener/poll up──▶ Connected
//!      ▲                             │                              │
//!      │                       spawn error                    listener exit /
//!      │                             ▼                         device lost
//!      └──────── reconnect ◀──── Error / Disconnected ◀────────────┘
//! ```

mod ledger;
mod pipeline;
mod reconnect;
mod state;

pub use ledger::{DownloadLedger, PendingFile};
pub use pipeline::{CapturedPhoto, DownloadPipeline, FileWait, local_filename};
pub use reconnect::{BackoffKind, ReconnectPolicy, TimerSlot};
pub use state::{ConnectionState, StatusSnapshot};

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::camera::parse::{file_name_of, has_extension, is_storage_full, parse_saved_file};
use crate::camera::{CameraGateway, DeviceFile, FolderDiscovery, TetherExit, TetherOutput, TetherStop};
use crate::error::{Result, ResultExt, TetherError};
use crate::events::{CameraEvent, ErrorKind, EventSink};

/// How new captures are detected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionMode {
    /// Long-lived listener that streams capture notifications.
    #[default]
    Tethered,
    /// Periodic folder listing.
    Poll,
}

/// Everything the service needs, already resolved from configuration.
#[derive(Debug, Clone)]
pub struct AcquisitionSettings {
    pub mode: AcquisitionMode,
    pub download_dir: PathBuf,
    /// Accepted image extensions, without dot, case-insensitive.
    pub extensions: Vec<String>,
    pub public_prefix: String,
    pub poll_interval: Duration,
    pub reconnect: ReconnectPolicy,
    pub file_wait: FileWait,
    /// Value for `capturetarget`, applied before the listener starts.
    pub capture_target: Option<String>,
    pub stop_grace: Duration,
    /// Poll mode: treat files already on the card at start as handled.
    pub skip_existing: bool,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            mode: AcquisitionMode::Tethered,
            download_dir: PathBuf::from("photos"),
            extensions: vec!["jpg".to_string(), "jpeg".to_string()],
            public_prefix: "/photos".to_string(),
            poll_interval: Duration::from_millis(2000),
            reconnect: ReconnectPolicy::default(),
            file_wait: FileWait::default(),
            capture_target: None,
            stop_grace: Duration::from_secs(5),
            skip_existing: true,
        }
    }
}

/// Result of one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Another poll was still running.
    Skipped,
    /// Listing succeeded; `queued` new identifiers were queued and drained.
    Checked { queued: usize },
    /// The folder could not be read but the camera is still there.
    Failed,
    /// The camera is gone.
    Lost,
}

struct Listener {
    generation: u64,
    stop: TetherStop,
    task: JoinHandle<()>,
}

/// Mutable state, guarded by one lock that is never held across an await.
struct Core {
    state: ConnectionState,
    reconnect_attempts: u32,
    presence_failures: u32,
    reconnect: TimerSlot,
    poller: Option<JoinHandle<()>>,
    listener: Option<Listener>,
    listener_generation: u64,
    ledger: DownloadLedger,
    baseline_pending: bool,
}

/// Clears a busy flag on drop.
struct FlagGuard<'a>(&'a AtomicBool);

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct Inner<G: CameraGateway> {
    gateway: Arc<G>,
    settings: AcquisitionSettings,
    sink: Arc<dyn EventSink>,
    pipeline: DownloadPipeline,
    discovery: FolderDiscovery,
    shutting_down: AtomicBool,
    paused: AtomicBool,
    /// Set while the service is being stopped; in-flight attempts watch it.
    shutdown: watch::Sender<bool>,
    /// Held for the whole of one connection attempt.
    attempt: tokio::sync::Mutex<()>,
    poll_busy: AtomicBool,
    core: Mutex<Core>,
}

/// The acquisition state machine.
///
/// Cheap to clone; clones share the same instance.
pub struct CameraService<G: CameraGateway> {
    inner: Arc<Inner<G>>,
}

impl<G: CameraGateway> Clone for CameraService<G> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<G: CameraGateway> CameraService<G> {
    pub fn new(gateway: Arc<G>, settings: AcquisitionSettings, sink: Arc<dyn EventSink>) -> Self {
        let (shutdown, _) = watch::channel(false);
        let pipeline = DownloadPipeline::new(
            settings.download_dir.clone(),
            settings.public_prefix.clone(),
            settings.file_wait,
        );
        Self {
            inner: Arc::new(Inner {
                gateway,
                settings,
                sink,
                pipeline,
                discovery: FolderDiscovery::new(),
                shutting_down: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                shutdown,
                attempt: tokio::sync::Mutex::new(()),
                poll_busy: AtomicBool::new(false),
                core: Mutex::new(Core {
                    state: ConnectionState::Disconnected,
                    reconnect_attempts: 0,
                    presence_failures: 0,
                    reconnect: TimerSlot::new(),
                    poller: None,
                    listener: None,
                    listener_generation: 0,
                    ledger: DownloadLedger::new(),
                    baseline_pending: false,
                }),
            }),
        }
    }

    pub fn settings(&self) -> &AcquisitionSettings {
        &self.inner.settings
    }

    pub fn gateway(&self) -> &Arc<G> {
        &self.inner.gateway
    }

    /// Create the download directory and attempt the first connection.
    ///
    /// Only a failure to create the download directory is returned; camera
    /// problems are handled by scheduling reconnects.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        inner.shutting_down.store(false, Ordering::SeqCst);
        inner.shutdown.send_replace(false);

        tokio::fs::create_dir_all(&inner.settings.download_dir)
            .await
            .with_context(|| {
                format!(
                    "Failed to create download directory {}",
                    inner.settings.download_dir.display()
                )
            })?;

        {
            let mut core = inner.lock();
            core.reconnect.cancel();
            core.ledger.clear();
            core.reconnect_attempts = 0;
            core.baseline_pending =
                inner.settings.skip_existing && inner.settings.mode == AcquisitionMode::Poll;
        }

        info!(
            mode = ?inner.settings.mode,
            download_dir = %inner.settings.download_dir.display(),
            "Starting camera service"
        );
        inner.connect().await;
        Ok(())
    }

    /// Tear everything down: abandon any connection attempt in flight, cancel
    /// timers, stop the listener (SIGTERM, then kill after the grace period)
    /// and publish a final `status` event.
    ///
    /// Safe to call at any time, including before `start()`.
    pub async fn stop(&self) {
        let inner = &self.inner;
        inner.shutting_down.store(true, Ordering::SeqCst);
        inner.shutdown.send_replace(true);
        info!("Stopping camera service");

        inner.lock().reconnect.cancel();
        // Waits for an abandoned attempt to unwind.
        let _attempt = inner.attempt.lock().await;

        let (listener, poller) = {
            let mut core = inner.lock();
            core.reconnect.cancel();
            (core.listener.take(), core.poller.take())
        };

        if let Some(poller) = poller {
            poller.abort();
        }

        if let Some(mut listener) = listener {
            listener.stop.request();
            let wait = inner.settings.stop_grace + Duration::from_secs(1);
            if tokio::time::timeout(wait, &mut listener.task).await.is_err() {
                warn!("Listener did not shut down in time, aborting");
                listener.task.abort();
            }
        }

        // Not `transition`: the final status goes out even when unchanged.
        let mut core = inner.lock();
        core.state = ConnectionState::Disconnected;
        inner
            .sink
            .publish(CameraEvent::status(ConnectionState::Disconnected));
        info!("Camera service stopped");
    }

    /// Suspend photo emission. The connection and listener stay up; captures
    /// detected while paused are discarded.
    pub fn pause(&self) {
        if !self.inner.paused.swap(true, Ordering::SeqCst) {
            info!("Capture emission paused");
        }
    }

    pub fn resume(&self) {
        if self.inner.paused.swap(false, Ordering::SeqCst) {
            info!("Capture emission resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// Forget which identifiers were handled so the next capture cycle starts
    /// fresh. The connection state is untouched.
    pub fn reset_session(&self) {
        let mut core = self.inner.lock();
        core.ledger.reset_handled();
        core.baseline_pending = false;
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn status(&self) -> StatusSnapshot {
        let folder = self.inner.discovery.cached();
        let core = self.inner.lock();
        StatusSnapshot {
            connected: core.state.is_connected(),
            state: core.state,
            paused: self.is_paused(),
            folder,
            downloaded: core.ledger.handled_len(),
            queued: core.ledger.queued_len(),
            reconnect_pending: core.reconnect.is_pending(),
        }
    }

    pub fn has_pending_reconnect(&self) -> bool {
        self.inner.lock().reconnect.is_pending()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.lock().reconnect_attempts
    }

    /// Run one poll cycle now. Returns [`PollOutcome::Skipped`] if another
    /// cycle is still in flight.
    pub async fn poll_once(&self) -> PollOutcome {
        self.inner.poll_once().await
    }
}

impl<G: CameraGateway> Inner<G> {
    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Change state; publishes only when the value actually changes.
    fn transition(&self, core: &mut Core, next: ConnectionState) -> bool {
        if core.state == next {
            return false;
        }
        info!(from = %core.state, to = %next, "Connection state changed");
        core.state = next;
        if next.is_connected() {
            core.reconnect_attempts = 0;
        }
        self.sink.publish(CameraEvent::status(next));
        true
    }

    fn set_state(&self, next: ConnectionState) -> bool {
        let mut core = self.lock();
        self.transition(&mut core, next)
    }

    fn publish_error(&self, err: &TetherError) {
        self.sink
            .publish(CameraEvent::error(ErrorKind::from(err), err.to_string()));
    }

    /// One connection attempt, abandoned as soon as shutdown begins.
    async fn connect(self: &Arc<Self>) {
        if self.shutting_down() {
            return;
        }
        let Ok(_attempt) = self.attempt.try_lock() else {
            debug!("Connection attempt already in progress");
            return;
        };

        tokio::select! {
            () = self.attempt_connection() => {}
            () = self.shutdown_requested() => {
                debug!("Connection attempt abandoned for shutdown");
            }
        }
    }

    /// Resolves once `stop()` has begun.
    async fn shutdown_requested(&self) {
        let mut rx = self.shutdown.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Presence check, then the acquisition mode.
    async fn attempt_connection(self: &Arc<Self>) {
        let present = self.gateway.check_presence().await;
        if self.shutting_down() {
            return;
        }

        if !present {
            let failures = {
                let mut core = self.lock();
                core.presence_failures = core.presence_failures.saturating_add(1);
                core.presence_failures
            };
            if failures == 1 {
                info!("Camera not detected, waiting for it to appear");
            } else {
                debug!(failures, "Camera still not detected");
            }
            self.set_state(ConnectionState::Disconnected);
            self.schedule_reconnect();
            return;
        }

        {
            let mut core = self.lock();
            if core.presence_failures > 0 {
                info!(after = core.presence_failures, "Camera detected");
            }
            core.presence_failures = 0;
            self.transition(&mut core, ConnectionState::Connecting);
        }

        match self.settings.mode {
            AcquisitionMode::Tethered => self.start_tethered().await,
            AcquisitionMode::Poll => self.start_polling().await,
        }
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        if self.shutting_down() {
            debug!("Shutting down, not scheduling reconnect");
            return;
        }

        let mut core = self.lock();
        let attempt = core.reconnect_attempts;
        core.reconnect_attempts = core.reconnect_attempts.saturating_add(1);
        let delay = self.settings.reconnect.delay_for(attempt);
        debug!(
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Reconnect scheduled"
        );

        let inner = Arc::clone(self);
        core.reconnect.arm(delay, move |generation| {
            async move { inner.on_reconnect_timer(generation).await }.boxed()
        });
    }

    async fn on_reconnect_timer(self: Arc<Self>, generation: u64) {
        if !self.lock().reconnect.claim(generation) {
            trace!(generation, "Superseded reconnect timer fired");
            return;
        }
        if self.shutting_down() {
            return;
        }
        debug!("Reconnecting");
        self.connect().await;
    }

    // === Tethered mode ===

    async fn start_tethered(self: &Arc<Self>) {
        // The listener saves files itself; the folder is informational here.
        match self.discovery.resolve(&*self.gateway).await {
            Ok(folder) => debug!(folder = %folder, "Photo folder available"),
            Err(e) => warn!(error = %e, "Photo folder discovery failed, continuing"),
        }
        if self.shutting_down() {
            return;
        }

        if let Some(target) = &self.settings.capture_target {
            if let Err(e) = self.gateway.set_config("capturetarget", target).await {
                warn!(error = %e, target = %target, "Could not set capture target");
            }
            if self.shutting_down() {
                return;
            }
        }

        let stale = self.lock().listener.take();
        if let Some(mut stale) = stale {
            debug!(generation = stale.generation, "Stopping previous listener");
            stale.stop.request();
        }
        if self.shutting_down() {
            return;
        }

        let process = match self.gateway.start_tethered(&self.settings.download_dir).await {
            Ok(process) => process,
            Err(e) => {
                error!(error = %e, "Failed to start tethered listener");
                self.set_state(ConnectionState::Error);
                self.publish_error(&e);
                self.schedule_reconnect();
                return;
            }
        };

        let mut stop = process.stop;
        let mut core = self.lock();
        if self.shutting_down() {
            stop.request();
            return;
        }

        core.listener_generation = core.listener_generation.wrapping_add(1);
        let generation = core.listener_generation;
        let inner = Arc::clone(self);
        let task = tokio::spawn(inner.run_listener(generation, process.output));
        core.listener = Some(Listener {
            generation,
            stop,
            task,
        });
        self.transition(&mut core, ConnectionState::Connected);
        info!(generation, "Tethered capture listening");
    }

    async fn run_listener(
        self: Arc<Self>,
        generation: u64,
        mut output: mpsc::UnboundedReceiver<TetherOutput>,
    ) {
        let mut exit = None;
        while let Some(item) = output.recv().await {
            match item {
                TetherOutput::Line(line) => self.handle_listener_line(&line).await,
                TetherOutput::Exited(status) => {
                    exit = Some(status);
                    break;
                }
            }
        }
        self.handle_listener_exit(generation, exit.unwrap_or(TetherExit::crashed(None)));
    }

    async fn handle_listener_line(self: &Arc<Self>, line: &str) {
        trace!(line, "Listener output");

        if is_storage_full(line) {
            warn!(line, "Camera reports storage full");
            self.publish_error(&TetherError::StorageFull(line.trim().to_string()));
            return;
        }

        let Some(saved) = parse_saved_file(line) else {
            return;
        };
        let filename = file_name_of(saved);
        if !has_extension(filename, &self.settings.extensions) {
            debug!(file = filename, "Ignoring capture with unexpected extension");
            return;
        }
        if self.is_paused() {
            info!(file = filename, "Capture discarded while paused");
            return;
        }

        let queued = self.lock().ledger.enqueue(PendingFile::tethered(filename));
        if queued {
            self.drain_queue(None).await;
        } else {
            debug!(file = filename, "Capture already handled this session");
        }
    }

    fn handle_listener_exit(self: &Arc<Self>, generation: u64, exit: TetherExit) {
        {
            let mut core = self.lock();
            let current = core.listener.as_ref().map(|l| l.generation);
            if current != Some(generation) {
                debug!(generation, "Previous listener exited");
                return;
            }
            core.listener = None;

            if self.shutting_down() {
                debug!(code = ?exit.code, "Listener exited during shutdown");
                return;
            }

            warn!(code = ?exit.code, requested = exit.requested, "Tethered listener exited, camera disconnected");
            self.transition(&mut core, ConnectionState::Disconnected);
        }
        self.discovery.invalidate();
        self.schedule_reconnect();
    }

    // === Poll mode ===

    async fn start_polling(self: &Arc<Self>) {
        if let Err(e) = self.discovery.resolve(&*self.gateway).await {
            warn!(error = %e, "Photo folder discovery failed");
            self.discovery.invalidate();
            self.set_state(ConnectionState::Disconnected);
            self.schedule_reconnect();
            return;
        }
        if self.shutting_down() {
            return;
        }

        let mut core = self.lock();
        if self.shutting_down() {
            return;
        }
        if let Some(previous) = core.poller.take() {
            previous.abort();
        }
        let inner = Arc::clone(self);
        core.poller = Some(tokio::spawn(inner.poll_loop()));
        self.transition(&mut core, ConnectionState::Connected);
        info!(
            interval_ms = u64::try_from(self.settings.poll_interval.as_millis()).unwrap_or(u64::MAX),
            "Polling for new captures"
        );
    }

    async fn poll_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if self.shutting_down() {
                return;
            }
            if self.poll_once().await == PollOutcome::Lost {
                break;
            }
        }

        {
            let mut core = self.lock();
            core.poller = None;
            if self.shutting_down() {
                return;
            }
            warn!("Camera lost while polling");
            self.transition(&mut core, ConnectionState::Disconnected);
        }
        self.schedule_reconnect();
    }

    #[instrument(skip(self))]
    async fn poll_once(self: &Arc<Self>) -> PollOutcome {
        if self.poll_busy.swap(true, Ordering::SeqCst) {
            debug!("Previous poll still running, skipping");
            return PollOutcome::Skipped;
        }
        let _busy = FlagGuard(&self.poll_busy);

        let folder = match self.discovery.resolve(&*self.gateway).await {
            Ok(folder) => folder,
            Err(e) => {
                warn!(error = %e, "Photo folder unavailable");
                self.discovery.invalidate();
                return self.classify_poll_failure().await;
            }
        };

        let files = match self.gateway.list_files(&folder).await {
            Ok(files) => files,
            Err(e) => {
                warn!(folder = %folder, error = %e, "Listing photo folder failed");
                self.discovery.invalidate();
                return self.classify_poll_failure().await;
            }
        };

        let candidates: Vec<DeviceFile> = files
            .into_iter()
            .filter(|f| has_extension(&f.name, &self.settings.extensions))
            .collect();

        let queued = {
            let mut core = self.lock();
            if core.baseline_pending {
                core.baseline_pending = false;
                let seeded = core.ledger.seed(candidates.iter().map(|f| f.name.clone()));
                info!(existing = seeded, "Skipping photos already on the camera");
                0
            } else if self.is_paused() {
                let mut discarded = 0;
                for file in &candidates {
                    if !core.ledger.is_handled(&file.name) && !core.ledger.is_queued(&file.name) {
                        core.ledger.mark_handled(&file.name);
                        discarded += 1;
                    }
                }
                if discarded > 0 {
                    info!(discarded, "Captures discarded while paused");
                }
                0
            } else {
                candidates
                    .into_iter()
                    .filter(|f| core.ledger.enqueue(PendingFile::listed(f.name.clone(), f.index)))
                    .count()
            }
        };

        if queued > 0 {
            debug!(queued, "New captures detected");
        }
        self.drain_queue(Some(folder.as_str())).await;
        PollOutcome::Checked { queued }
    }

    /// A poll failed: distinguish "folder moved" from "camera gone".
    async fn classify_poll_failure(&self) -> PollOutcome {
        if self.gateway.check_presence().await {
            PollOutcome::Failed
        } else {
            PollOutcome::Lost
        }
    }

    // === Download pipeline ===

    /// Transfer queued captures one at a time, marking each handled whatever
    /// the outcome.
    async fn drain_queue(self: &Arc<Self>, folder: Option<&str>) {
        loop {
            let next = self.lock().ledger.pop();
            let Some(next) = next else {
                break;
            };

            let result = match (folder, next.device_index) {
                (Some(folder), Some(index)) => {
                    let file = DeviceFile {
                        index,
                        name: next.name.clone(),
                    };
                    self.pipeline.download(&*self.gateway, folder, &file).await
                }
                _ => self.pipeline.collect_tethered(&next.name).await,
            };

            self.lock().ledger.mark_handled(&next.name);

            match result {
                Ok(photo) if self.is_paused() => {
                    info!(file = %photo.local_filename, "Capture discarded while paused");
                }
                Ok(photo) => {
                    info!(file = %photo.local_filename, path = %photo.public_path, "New photo");
                    self.sink.publish(CameraEvent::photo(&photo));
                }
                Err(e) => {
                    warn!(file = %next.name, error = %e, "Capture could not be collected");
                    self.publish_error(&e);
                }
            }

            if self.shutting_down() {
                break;
            }
        }
    }
}

//! gphoto2 command-line gateway.
//!
//! Each operation spawns one `gphoto2` process with fixed arguments and
//! parses its combined output. The tethered listener is supervised by a
//! background task that forwards output lines and reports the exit.

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

use super::parse::{self, DetectedCamera};
use super::tether::{TetherExit, TetherOutput, TetherProcess, TetherWiring, tether_channel};
use super::{CameraGateway, DeviceFile};
use crate::error::{Result, TetherError};

/// How to launch gphoto2 and how long to wait for it.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Program to execute (normally `gphoto2`).
    pub program: String,
    /// Arguments placed before every operation's own arguments.
    pub base_args: Vec<String>,
    /// Presence check timeout; the check resolves to "not present" after it.
    pub presence_timeout: Duration,
    /// Timeout for list/get/set operations.
    pub command_timeout: Duration,
    /// Wait after SIGTERM before the listener is killed.
    pub stop_grace: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            program: "gphoto2".to_string(),
            base_args: Vec::new(),
            presence_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(30),
            stop_grace: Duration::from_secs(5),
        }
    }
}

/// Collected output of a finished command.
#[derive(Debug)]
struct CommandOutput {
    code: Option<i32>,
    text: String,
}

/// Resets a busy flag when dropped, including on timeout cancellation.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Camera gateway backed by the gphoto2 CLI.
#[derive(Debug)]
pub struct GphotoGateway {
    settings: GatewaySettings,
    presence_busy: AtomicBool,
}

impl GphotoGateway {
    #[must_use]
    pub fn new(settings: GatewaySettings) -> Self {
        Self {
            settings,
            presence_busy: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.settings.program);
        cmd.args(&self.settings.base_args)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, err: &std::io::Error) -> TetherError {
        TetherError::CommandSpawn {
            program: self.settings.program.clone(),
            reason: err.to_string(),
        }
    }

    /// Run one operation to completion, killing it after `timeout`.
    async fn run(&self, operation: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
        trace!(operation, ?args, "Running camera command");
        let child = self
            .command(args)
            .spawn()
            .map_err(|e| self.spawn_error(&e))?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| TetherError::CommandTimeout {
                operation: operation.to_string(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })??;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            code: output.status.code(),
            text,
        })
    }

    /// Run an operation and require a zero exit code.
    async fn run_checked(&self, operation: &str, args: &[&str]) -> Result<String> {
        let output = self
            .run(operation, args, self.settings.command_timeout)
            .await?;
        if output.code == Some(0) {
            return Ok(output.text);
        }
        if parse::is_storage_full(&output.text) {
            return Err(TetherError::StorageFull(output.text.trim().to_string()));
        }
        Err(TetherError::CommandFailed {
            operation: operation.to_string(),
            code: output.code,
            output: output.text.trim().to_string(),
        })
    }

    /// List attached cameras.
    ///
    /// Resolves to an empty list while another presence check is running,
    /// without spawning a second process.
    #[instrument(skip(self))]
    pub async fn detect_cameras(&self) -> Result<Vec<DetectedCamera>> {
        if self.presence_busy.swap(true, Ordering::SeqCst) {
            debug!("Presence check already in flight, skipping");
            return Ok(Vec::new());
        }
        let _busy = BusyGuard(&self.presence_busy);

        let output = self
            .run(
                "auto-detect",
                &["--auto-detect"],
                self.settings.presence_timeout,
            )
            .await?;
        Ok(parse::parse_auto_detect(&output.text))
    }
}

#[async_trait]
impl CameraGateway for GphotoGateway {
    async fn check_presence(&self) -> bool {
        match self.detect_cameras().await {
            Ok(cameras) => {
                trace!(count = cameras.len(), "Presence check finished");
                !cameras.is_empty()
            }
            Err(e) => {
                debug!(error = %e, "Presence check failed");
                false
            }
        }
    }

    #[instrument(skip(self))]
    async fn list_folders(&self, parent: &str) -> Result<Vec<String>> {
        let text = self
            .run_checked("list-folders", &["--folder", parent, "--list-folders"])
            .await?;
        Ok(parse::parse_folder_listing(&text, parent))
    }

    #[instrument(skip(self))]
    async fn list_files(&self, folder: &str) -> Result<Vec<DeviceFile>> {
        let text = self
            .run_checked("list-files", &["--folder", folder, "--list-files"])
            .await?;
        Ok(parse::parse_file_listing(&text, folder))
    }

    #[instrument(skip(self, file), fields(file = %file.name))]
    async fn get_file(&self, folder: &str, file: &DeviceFile, dest: &Path) -> Result<()> {
        let index = file.index.to_string();
        let dest = dest.to_string_lossy();
        self.run_checked(
            "get-file",
            &[
                "--folder",
                folder,
                "--get-file",
                &index,
                "--filename",
                &dest,
                "--force-overwrite",
            ],
        )
        .await
        .map_err(|e| match e {
            TetherError::StorageFull(_) => e,
            other => TetherError::Transfer {
                file: file.name.clone(),
                reason: other.to_string(),
            },
        })?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        let assignment = format!("{key}={value}");
        self.run_checked("set-config", &["--set-config", &assignment])
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn start_tethered(&self, target_dir: &Path) -> Result<TetherProcess> {
        let pattern = target_dir.join("%f.%C");
        let pattern = pattern.to_string_lossy();
        let mut cmd = self.command(&[
            "--capture-tethered",
            "--keep",
            "--force-overwrite",
            "--filename",
            &pattern,
        ]);
        // Own process group, so termination reaches anything it forks.
        #[cfg(unix)]
        cmd.process_group(0);
        let mut child = cmd.spawn().map_err(|e| self.spawn_error(&e))?;

        info!(pid = ?child.id(), "Tethered listener started");

        let (wiring, process) = tether_channel();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(forward_lines(stdout, wiring.output.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(forward_lines(stderr, wiring.output.clone()));
        }

        tokio::spawn(supervise(child, wiring, readers, self.settings.stop_grace));
        Ok(process)
    }
}

fn forward_lines<R>(stream: R, tx: mpsc::UnboundedSender<TetherOutput>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(TetherOutput::Line(line)).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, "Listener output stream failed");
                    break;
                }
            }
        }
    })
}

/// Wait for the listener to exit or for a stop request, then report the exit
/// after all output has been forwarded.
async fn supervise(
    mut child: Child,
    wiring: TetherWiring,
    readers: Vec<JoinHandle<()>>,
    grace: Duration,
) {
    let TetherWiring { output, stop } = wiring;

    let exit = tokio::select! {
        status = child.wait() => {
            let code = status.ok().and_then(|s| s.code());
            TetherExit::crashed(code)
        }
        _ = stop => TetherExit::stopped(terminate(&mut child, grace).await),
    };

    // Grandchildren may keep the pipes open; don't wait on them forever.
    let drained = tokio::time::timeout(Duration::from_secs(1), async {
        for reader in readers {
            let _ = reader.await;
        }
    })
    .await;
    if drained.is_err() {
        debug!("Listener output did not close after exit");
    }

    let _ = output.send(TetherOutput::Exited(exit));
}

/// SIGTERM to the listener's process group, then SIGKILL once `grace` has
/// passed.
async fn terminate(child: &mut Child, grace: Duration) -> Option<i32> {
    let pid = child.id();
    if let Some(pid) = pid {
        signal_group(pid, GroupSignal::Terminate);
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => status.code(),
        Ok(Err(e)) => {
            warn!(error = %e, "Failed to wait for listener");
            None
        }
        Err(_) => {
            warn!(
                grace_ms = grace.as_millis(),
                "Listener ignored SIGTERM, killing"
            );
            if let Some(pid) = pid {
                signal_group(pid, GroupSignal::Kill);
            }
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill listener");
            }
            None
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: GroupSignal) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(pid) = i32::try_from(pid) else {
        return;
    };
    let sig = match signal {
        GroupSignal::Terminate => Signal::SIGTERM,
        GroupSignal::Kill => Signal::SIGKILL,
    };
    if let Err(e) = killpg(Pid::from_raw(pid), sig) {
        debug!(pid, ?signal, error = %e, "Could not signal listener group");
    }
}

// Only `Child::kill` is available here.
#[cfg(not(unix))]
fn signal_group(_pid: u32, _signal: GroupSignal) {}

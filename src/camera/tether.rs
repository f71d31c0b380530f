//! Handle to a running tethered-capture listener.
//!
//! The listener's output and exit are delivered over one channel so a
//! consumer always sees every output line before the exit notification.

use tokio::sync::{mpsc, oneshot};

/// How the listener process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TetherExit {
    /// Process exit code, if it exited normally.
    pub code: Option<i32>,
    /// True if the exit followed a stop request.
    pub requested: bool,
}

impl TetherExit {
    #[must_use]
    pub const fn crashed(code: Option<i32>) -> Self {
        Self {
            code,
            requested: false,
        }
    }

    #[must_use]
    pub const fn stopped(code: Option<i32>) -> Self {
        Self {
            code,
            requested: true,
        }
    }
}

/// One item of listener output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TetherOutput {
    /// A line printed by the listener (stdout or stderr).
    Line(String),
    /// The listener exited. Always the last item.
    Exited(TetherExit),
}

/// Requests termination of a listener.
#[derive(Debug)]
pub struct TetherStop(Option<oneshot::Sender<()>>);

impl TetherStop {
    /// Ask the listener to terminate. Returns false if already requested or
    /// the listener is gone.
    pub fn request(&mut self) -> bool {
        self.0.take().is_some_and(|tx| tx.send(()).is_ok())
    }
}

/// Consumer side of a spawned listener.
#[derive(Debug)]
pub struct TetherProcess {
    pub output: mpsc::UnboundedReceiver<TetherOutput>,
    pub stop: TetherStop,
}

/// Producer side handed to the code supervising the listener.
#[derive(Debug)]
pub struct TetherWiring {
    pub output: mpsc::UnboundedSender<TetherOutput>,
    pub stop: oneshot::Receiver<()>,
}

/// Create a connected listener handle pair.
pub fn tether_channel() -> (TetherWiring, TetherProcess) {
    let (output_tx, output_rx) = mpsc::unbounded_channel();
    let (stop_tx, stop_rx) = oneshot::channel();
    (
        TetherWiring {
            output: output_tx,
            stop: stop_rx,
        },
        TetherProcess {
            output: output_rx,
            stop: TetherStop(Some(stop_tx)),
        },
    )
}

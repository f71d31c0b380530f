//! Event/status sink published to by the acquisition service.
//!
//! Exactly three event kinds exist: `status`, `photo` and `error`.
//! Publishing never blocks; slow subscribers of the [`EventBus`] miss events
//! rather than stall the camera.

use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::acquisition::{CapturedPhoto, ConnectionState};
use crate::error::TetherError;

/// Classification carried by `error` events so the presentation layer can
/// alert on storage problems distinctly from transient noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    Transfer,
    StorageFull,
    FileTimeout,
    Spawn,
}

impl From<&TetherError> for ErrorKind {
    fn from(err: &TetherError) -> Self {
        match err {
            TetherError::StorageFull(_) => Self::StorageFull,
            TetherError::FileNotReady { .. } => Self::FileTimeout,
            TetherError::Transfer { .. } => Self::Transfer,
            TetherError::CommandSpawn { .. } => Self::Spawn,
            _ => Self::Transient,
        }
    }
}

/// Outbound event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CameraEvent {
    Status {
        connected: bool,
        state: ConnectionState,
    },
    Photo {
        filename: String,
        path: String,
    },
    Error {
        message: String,
        kind: ErrorKind,
    },
}

impl CameraEvent {
    #[must_use]
    pub const fn status(state: ConnectionState) -> Self {
        Self::Status {
            connected: state.is_connected(),
            state,
        }
    }

    #[must_use]
    pub fn photo(photo: &CapturedPhoto) -> Self {
        Self::Photo {
            filename: photo.local_filename.clone(),
            path: photo.public_path.clone(),
        }
    }

    #[must_use]
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            kind,
        }
    }

    /// Event name used on the wire (e.g. SSE `event:` field).
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Photo { .. } => "photo",
            Self::Error { .. } => "error",
        }
    }
}

/// Publish surface of the acquisition service.
pub trait EventSink: Send + Sync {
    /// Fire-and-forget; must not block.
    fn publish(&self, event: CameraEvent);
}

/// Broadcast-backed sink with any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CameraEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CameraEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventSink for EventBus {
    fn publish(&self, event: CameraEvent) {
        trace!(event = event.name(), "Publishing event");
        // No subscribers is not an error.
        let _ = self.tx.send(event);
    }
}

/// Sink that keeps every event, for assertions.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<CameraEvent>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CameraEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// States from `status` events, in order.
    pub fn states(&self) -> Vec<ConnectionState> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                CameraEvent::Status { state, .. } => Some(state),
                _ => None,
            })
            .collect()
    }

    /// `(filename, path)` of `photo` events, in order.
    pub fn photos(&self) -> Vec<(String, String)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                CameraEvent::Photo { filename, path } => Some((filename, path)),
                _ => None,
            })
            .collect()
    }

    /// `(kind, message)` of `error` events, in order.
    pub fn errors(&self) -> Vec<(ErrorKind, String)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                CameraEvent::Error { message, kind } => Some((kind, message)),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: CameraEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

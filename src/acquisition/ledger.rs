//! Per-session download bookkeeping: the handled set and the pending queue.

use std::collections::{HashSet, VecDeque};

use tracing::{debug, info, trace};

/// A capture waiting to be transferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFile {
    /// Device-side identifier (file name).
    pub name: String,
    /// Position in the device listing; `None` for tethered captures, which
    /// the listener has already written locally.
    pub device_index: Option<u32>,
}

impl PendingFile {
    #[must_use]
    pub fn listed(name: impl Into<String>, index: u32) -> Self {
        Self {
            name: name.into(),
            device_index: Some(index),
        }
    }

    #[must_use]
    pub fn tethered(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device_index: None,
        }
    }
}

/// DownloadedSet + DownloadQueue.
///
/// An identifier is never queued twice, and never queued again once handled
/// within the same session.
#[derive(Debug, Default)]
pub struct DownloadLedger {
    handled: HashSet<String>,
    queue: VecDeque<PendingFile>,
}

impl DownloadLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a capture. Returns false (no-op) if it is already queued or
    /// already handled.
    pub fn enqueue(&mut self, file: PendingFile) -> bool {
        if self.handled.contains(&file.name) || self.is_queued(&file.name) {
            trace!(name = %file.name, "Skipping duplicate capture");
            return false;
        }
        debug!(name = %file.name, "Queued capture");
        self.queue.push_back(file);
        true
    }

    /// Next capture to transfer.
    pub fn pop(&mut self) -> Option<PendingFile> {
        self.queue.pop_front()
    }

    /// Record that a transfer attempt finished, successfully or not.
    pub fn mark_handled(&mut self, name: &str) {
        self.handled.insert(name.to_string());
    }

    /// Mark identifiers as handled without transferring them.
    pub fn seed<I, S>(&mut self, names: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let before = self.handled.len();
        self.handled.extend(names.into_iter().map(Into::into));
        self.handled.len() - before
    }

    pub fn is_handled(&self, name: &str) -> bool {
        self.handled.contains(name)
    }

    pub fn is_queued(&self, name: &str) -> bool {
        self.queue.iter().any(|f| f.name == name)
    }

    pub fn handled_len(&self) -> usize {
        self.handled.len()
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Forget handled identifiers so they count as new again.
    pub fn reset_handled(&mut self) {
        info!(forgotten = self.handled.len(), "Download history cleared");
        self.handled.clear();
    }

    /// Forget everything, including pending captures.
    pub fn clear(&mut self) {
        self.handled.clear();
        self.queue.clear();
    }
}

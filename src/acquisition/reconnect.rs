//! Reconnect delay policy and the single pending reconnect timer.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::trace;

/// Backoff policy kind as written in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}

/// Delay between consecutive reconnection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Same delay every time.
    Fixed(Duration),
    /// `base * 2^attempt`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::Fixed(Duration::from_millis(3000))
    }
}

impl ReconnectPolicy {
    #[must_use]
    pub const fn new(kind: BackoffKind, delay: Duration, max: Duration) -> Self {
        match kind {
            BackoffKind::Fixed => Self::Fixed(delay),
            BackoffKind::Exponential => Self::Exponential { base: delay, max },
        }
    }

    /// Delay before retrying after `attempt` consecutive failures (0-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed(delay) => delay,
            Self::Exponential { base, max } => {
                let factor = 2u32.checked_pow(attempt.min(31)).unwrap_or(u32::MAX);
                base.checked_mul(factor).map_or(max, |d| d.min(max))
            }
        }
    }
}

/// Holds at most one pending timer.
///
/// Arming always cancels the previous timer first. Each timer carries a
/// generation so a timer that already fired can tell whether it is still
/// the current one.
#[derive(Debug, Default)]
pub struct TimerSlot {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

impl TimerSlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel any pending timer and run `task(generation)` after `delay`.
    pub fn arm<F, Fut>(&mut self, delay: Duration, task: F) -> u64
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.generation = self.generation.wrapping_add(1);
        let generation = self.generation;
        let fut = task(generation);
        trace!(generation, delay_ms = delay.as_millis(), "Timer armed");
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fut.await;
        }));
        generation
    }

    /// Called by a fired timer. Returns true, and clears the slot, only if
    /// `generation` is still the current timer.
    pub fn claim(&mut self, generation: u64) -> bool {
        if self.generation == generation && self.handle.is_some() {
            self.handle = None;
            true
        } else {
            false
        }
    }

    /// Abort the pending timer. Returns true if one was pending.
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.handle.is_some()
    }
}

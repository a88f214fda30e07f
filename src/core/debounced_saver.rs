//! Debounced saver - delays canvas snapshot writes after graph changes.
//!
//! Dragging nodes or creating a burst of edges changes the graph many times per
//! second. Instead of writing a snapshot for each change:
//! 1. Every change (re)schedules a write for the active installation
//! 2. Once the delay elapses without further changes, the host writes once
//!
//! A flush on teardown bypasses the delay.

use std::time::{Duration, Instant};

use crate::entities::InstallationId;

/// Debounce timer for canvas snapshot writes.
///
/// # Usage
/// ```ignore
/// // On graph change:
/// saver.schedule(installation_id);
///
/// // In host loop:
/// if let Some(id) = saver.tick() {
///     write_snapshot(id);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct DebouncedSaver {
    /// Delay before the write is due
    delay: Duration,
    /// Pending write: (installation, due time)
    pending: Option<(InstallationId, Instant)>,
}

impl Default for DebouncedSaver {
    fn default() -> Self {
        Self::new(crate::settings::DEFAULT_PERSIST_DEBOUNCE_MS)
    }
}

impl DebouncedSaver {
    /// Create with custom delay
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            pending: None,
        }
    }

    /// Get current delay in milliseconds
    pub fn delay_ms(&self) -> u64 {
        self.delay.as_millis() as u64
    }

    /// Schedule a delayed write. If already pending, resets the timer.
    pub fn schedule(&mut self, installation: InstallationId) {
        self.schedule_at(installation, Instant::now());
    }

    pub fn schedule_at(&mut self, installation: InstallationId, now: Instant) {
        self.pending = Some((installation, now + self.delay));
        log::trace!(
            "DebouncedSaver: scheduled write for installation {} in {}ms",
            installation,
            self.delay.as_millis()
        );
    }

    /// Cancel any pending write
    pub fn cancel(&mut self) {
        if self.pending.is_some() {
            log::trace!("DebouncedSaver: cancelled pending write");
        }
        self.pending = None;
    }

    /// Returns the installation to write if the delay has elapsed.
    /// Clears the pending state when triggered.
    pub fn tick(&mut self) -> Option<InstallationId> {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> Option<InstallationId> {
        let (installation, due) = self.pending?;
        if now >= due {
            self.pending = None;
            log::trace!("DebouncedSaver: write due for installation {}", installation);
            Some(installation)
        } else {
            None
        }
    }

    /// Check if there's a pending write
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending_installation(&self) -> Option<InstallationId> {
        self.pending.map(|(id, _)| id)
    }
}

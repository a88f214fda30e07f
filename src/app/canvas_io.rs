//! Canvas I/O for GraphSync.
//!
//! Contains methods for:
//! - Switching the active installation (switch_installation)
//! - Driving debounced writes from the host loop (tick, flush, autosave)
//! - Teardown (shutdown)

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::info;
use tokio::sync::oneshot;

use super::GraphSync;
use crate::core::graph_store::InstallationToken;
use crate::entities::InstallationId;
use crate::error::EngineError;

impl GraphSync {
    /// Flush the current canvas and load the canvas of `installation`.
    ///
    /// Requests started before the switch keep running; their results are
    /// discarded because the returned token supersedes theirs.
    pub fn switch_installation(&self, installation: InstallationId) -> InstallationToken {
        self.persistence.switch_installation(installation)
    }

    /// Write the canvas if its debounce delay elapsed (call from the host loop)
    pub fn tick(&self) -> Result<Option<InstallationId>, EngineError> {
        self.persistence.tick()
    }

    /// Write the active canvas immediately
    pub fn flush(&self) -> Result<(), EngineError> {
        self.persistence.flush()
    }

    /// Autosave loop for tokio hosts; flushes and ends when `stop` fires or is dropped.
    pub fn autosave(
        &self,
        period: Duration,
        stop: oneshot::Receiver<()>,
    ) -> impl Future<Output = ()> + Send + 'static {
        Arc::clone(&self.persistence).run_autosave(period, stop)
    }

    /// Tear down: drop event subscriptions, stop listening to the store and
    /// write the active canvas one last time.
    pub fn shutdown(mut self) -> Result<(), EngineError> {
        info!("GraphSync shutdown ({} subscriptions)", self.subscriptions.len());
        self.subscriptions.clear();
        self.persistence.detach();
        self.persistence.flush()
    }
}

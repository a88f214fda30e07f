//! Per-installation canvas snapshots.
//!
//! **Why**: the canvas (positions, confirmed edges, last known figures) is
//! client state the server does not keep. It is written shortly after every
//! change, flushed on teardown, and restored when an installation becomes
//! active again.
//!
//! # Write path
//!
//! ```text
//! GraphStore change → DebouncedSaver::schedule(active)
//! host loop         → CanvasPersistence::tick() → SnapshotStore::save
//! teardown / switch → CanvasPersistence::flush()
//! ```
//!
//! # Restore path
//!
//! Session memory first (canvases visited during this run), then the
//! snapshot store, then an empty canvas. Handlers are rebuilt by
//! [`NodeProjector::rehydrate`]; read-only flags are never stored and follow
//! the new active installation automatically.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info, trace, warn};
use tokio::sync::oneshot;

use super::debounced_saver::DebouncedSaver;
use super::graph_store::{GraphChange, GraphStore, InstallationToken, ListenerId};
use super::node_projector::NodeProjector;
use crate::entities::{CanvasSnapshot, InstallationId};
use crate::error::EngineError;

/// Where canvas snapshots live
pub trait SnapshotStore: Send + Sync {
    fn load(&self, installation: InstallationId) -> Result<Option<CanvasSnapshot>>;
    fn save(&self, snapshot: &CanvasSnapshot) -> Result<()>;
}

// ========== File store ==========

/// One pretty-printed `canvas_<installation>.json` per installation
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, installation: InstallationId) -> PathBuf {
        self.dir.join(format!("canvas_{}.json", installation))
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self, installation: InstallationId) -> Result<Option<CanvasSnapshot>> {
        let path = self.path_for(installation);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Read canvas error: {}", path.display()))?;
        let snapshot = serde_json::from_str(&json)
            .with_context(|| format!("Parse canvas error: {}", path.display()))?;
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &CanvasSnapshot) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create canvas dir: {}", self.dir.display()))?;
        let path = self.path_for(snapshot.installation_id);
        let json = serde_json::to_string_pretty(snapshot).context("Serialize canvas error")?;
        // Write then rename so a crash never leaves a truncated canvas behind
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("Write canvas error: {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("Replace canvas error: {}", path.display()))?;
        Ok(())
    }
}

// ========== Memory store ==========

/// Snapshot store kept in memory (hosts without disk access, tests)
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: Mutex<HashMap<InstallationId, CanvasSnapshot>>,
    saves: Mutex<usize>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self, installation: InstallationId) -> Result<Option<CanvasSnapshot>> {
        Ok(self
            .snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&installation)
            .cloned())
    }

    fn save(&self, snapshot: &CanvasSnapshot) -> Result<()> {
        self.snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(snapshot.installation_id, snapshot.clone());
        *self.saves.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }
}

// ========== Persistence ==========

pub struct CanvasPersistence {
    store: Arc<GraphStore>,
    projector: Arc<NodeProjector>,
    snapshots: Arc<dyn SnapshotStore>,
    saver: Mutex<DebouncedSaver>,
    /// Last written canvas per installation visited in this session
    session: Mutex<HashMap<InstallationId, CanvasSnapshot>>,
    listener: Mutex<Option<ListenerId>>,
}

impl CanvasPersistence {
    pub fn new(
        store: Arc<GraphStore>,
        projector: Arc<NodeProjector>,
        snapshots: Arc<dyn SnapshotStore>,
        debounce_ms: u64,
    ) -> Self {
        Self {
            store,
            projector,
            snapshots,
            saver: Mutex::new(DebouncedSaver::new(debounce_ms)),
            session: Mutex::new(HashMap::new()),
            listener: Mutex::new(None),
        }
    }

    fn saver(&self) -> std::sync::MutexGuard<'_, DebouncedSaver> {
        self.saver.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start scheduling writes on store changes. Idempotent.
    pub fn attach(self: &Arc<Self>) {
        let mut listener = self.listener.lock().unwrap_or_else(|e| e.into_inner());
        if listener.is_some() {
            return;
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        *listener = Some(self.store.subscribe(move |change| {
            if let Some(persistence) = weak.upgrade() {
                persistence.on_change(change);
            }
        }));
    }

    /// Stop listening to the store; pending writes stay pending
    pub fn detach(&self) {
        if let Some(id) = self.listener.lock().unwrap_or_else(|e| e.into_inner()).take() {
            self.store.unsubscribe(id);
        }
    }

    fn on_change(&self, change: GraphChange) {
        // Read-only flags are derived, switching alone changes nothing on disk
        if change == GraphChange::ActiveInstallation {
            return;
        }
        if let Some(active) = self.store.active_installation() {
            self.saver().schedule(active);
        }
    }

    pub fn is_pending(&self) -> bool {
        self.saver().is_pending()
    }

    /// Write the canvas if its debounce delay elapsed. Returns the installation written.
    pub fn tick(&self) -> Result<Option<InstallationId>, EngineError> {
        let Some(due) = self.saver().tick() else {
            return Ok(None);
        };
        if self.store.active_installation() != Some(due) {
            trace!("Canvas write for {} skipped: no longer active", due);
            return Ok(None);
        }
        self.write(due)?;
        Ok(Some(due))
    }

    /// Write the active canvas now and drop any pending write
    pub fn flush(&self) -> Result<(), EngineError> {
        self.saver().cancel();
        match self.store.active_installation() {
            Some(active) => self.write(active),
            None => Ok(()),
        }
    }

    fn write(&self, installation: InstallationId) -> Result<(), EngineError> {
        let snapshot = self.store.snapshot(installation);
        self.session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(installation, snapshot.clone());
        self.snapshots.save(&snapshot)?;
        debug!(
            "Canvas {} saved: {} nodes, {} edges",
            installation,
            snapshot.nodes.len(),
            snapshot.edges.len()
        );
        Ok(())
    }

    /// Make `target` the active installation and load its canvas.
    ///
    /// The current canvas is flushed first. A failed flush or load is logged;
    /// the switch itself always completes.
    pub fn switch_installation(&self, target: InstallationId) -> InstallationToken {
        if let Err(e) = self.flush() {
            warn!("Canvas flush before switch failed: {}", e);
        }

        let snapshot = self.restore_source(target);
        info!(
            "Switching to installation {} ({} nodes, {} edges)",
            target,
            snapshot.nodes.len(),
            snapshot.edges.len()
        );
        let token = self.store.set_active_installation(Some(target));
        let nodes = self.projector.rehydrate(snapshot.nodes);
        self.store.replace_all(nodes, snapshot.edges);
        // Content just came from storage
        self.saver().cancel();
        token
    }

    fn restore_source(&self, target: InstallationId) -> CanvasSnapshot {
        let in_session = self
            .session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&target)
            .filter(|s| !s.is_empty())
            .cloned();
        if let Some(snapshot) = in_session {
            return snapshot;
        }
        match self.snapshots.load(target) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => CanvasSnapshot::empty(target),
            Err(e) => {
                warn!("{:#}; starting installation {} with an empty canvas", e, target);
                CanvasSnapshot::empty(target)
            }
        }
    }

    /// Host loop for tokio hosts: ticks every `period`, flushes on stop.
    pub async fn run_autosave(self: Arc<Self>, period: Duration, mut stop: oneshot::Receiver<()>) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick() {
                        warn!("Canvas autosave failed: {}", e);
                    }
                }
                _ = &mut stop => {
                    if let Err(e) = self.flush() {
                        warn!("Canvas flush on stop failed: {}", e);
                    }
                    debug!("Canvas autosave stopped");
                    break;
                }
            }
        }
    }
}

impl Drop for CanvasPersistence {
    fn drop(&mut self) {
        self.detach();
    }
}

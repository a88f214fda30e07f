//! Observable node/edge collection for the active canvas.
//!
//! **Why**: every other component reads and mutates the same graph; this is the
//! one place that owns it. It stores data only. Behaviour lives in the
//! coordinators, and read-only flags are derived on read.
//!
//! **Used by**: EdgeCoordinator, NodeProjector, CanvasPersistence, GraphSync
//!
//! # Installation epoch
//!
//! Switching the active installation bumps an epoch. Async work captures an
//! [`InstallationToken`] before its first await and checks
//! [`GraphStore::is_current`] before applying a response, so replies that
//! outlive a switch are discarded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use indexmap::IndexMap;
use log::{debug, trace};

use crate::entities::{
    BusinessId, CanvasSnapshot, EntityKind, GraphEdge, GraphNode, InstallationId,
    NodeId, NodeView,
};

/// What changed in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphChange {
    Nodes,
    Edges,
    /// Whole content replaced (rehydration, clear)
    Reset,
    /// Active installation switched; content may be unchanged
    ActiveInstallation,
}

/// Installation and epoch captured when a request started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallationToken {
    pub installation: Option<InstallationId>,
    pub epoch: u64,
}

pub type ChangeListener = Arc<dyn Fn(GraphChange) + Send + Sync>;

/// Handle returned by [`GraphStore::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct GraphState {
    nodes: IndexMap<NodeId, GraphNode>,
    edges: IndexMap<String, GraphEdge>,
    active: Option<InstallationId>,
    epoch: u64,
}

#[derive(Default)]
pub struct GraphStore {
    state: RwLock<GraphState>,
    listeners: RwLock<Vec<(ListenerId, ChangeListener)>>,
    next_listener: AtomicU64,
}

impl std::fmt::Debug for GraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("GraphStore")
            .field("nodes", &state.nodes.len())
            .field("edges", &state.edges.len())
            .field("active", &state.active)
            .field("epoch", &state.epoch)
            .finish()
    }
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, GraphState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, GraphState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    // ========== Change listeners ==========

    /// Register a listener called after every mutation (outside the store lock)
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(GraphChange) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(lid, _)| *lid != id);
    }

    fn notify(&self, change: GraphChange) {
        let listeners: Vec<ChangeListener> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        trace!("GraphStore: {:?} -> {} listener(s)", change, listeners.len());
        for listener in listeners {
            listener(change);
        }
    }

    // ========== Active installation ==========

    pub fn active_installation(&self) -> Option<InstallationId> {
        self.read().active
    }

    /// Switch the active installation and invalidate every outstanding token
    pub fn set_active_installation(&self, installation: Option<InstallationId>) -> InstallationToken {
        let token = {
            let mut state = self.write();
            state.active = installation;
            state.epoch += 1;
            InstallationToken { installation, epoch: state.epoch }
        };
        debug!("GraphStore: active installation {:?} (epoch {})", installation, token.epoch);
        self.notify(GraphChange::ActiveInstallation);
        token
    }

    pub fn token(&self) -> InstallationToken {
        let state = self.read();
        InstallationToken { installation: state.active, epoch: state.epoch }
    }

    /// Does the store still belong to the installation/epoch captured in `token`?
    pub fn is_current(&self, token: &InstallationToken) -> bool {
        self.token() == *token
    }

    // ========== Nodes ==========

    /// Insert or replace a node (keyed by local id)
    pub fn upsert_node(&self, node: GraphNode) {
        self.write().nodes.insert(node.id.clone(), node);
        self.notify(GraphChange::Nodes);
    }

    pub fn node(&self, id: &NodeId) -> Option<GraphNode> {
        self.read().nodes.get(id).cloned()
    }

    pub fn nodes(&self) -> Vec<GraphNode> {
        self.read().nodes.values().cloned().collect()
    }

    pub fn node_count(&self) -> usize {
        self.read().nodes.len()
    }

    /// Remove a node. Edges touching it are left to the caller.
    pub fn remove_node(&self, id: &NodeId) -> Option<GraphNode> {
        let removed = self.write().nodes.shift_remove(id);
        if removed.is_some() {
            self.notify(GraphChange::Nodes);
        }
        removed
    }

    /// Mutate a node in place. Returns false when it does not exist.
    pub fn update_node<F>(&self, id: &NodeId, f: F) -> bool
    where
        F: FnOnce(&mut GraphNode),
    {
        let found = match self.write().nodes.get_mut(id) {
            Some(node) => {
                f(node);
                true
            }
            None => false,
        };
        if found {
            self.notify(GraphChange::Nodes);
        }
        found
    }

    /// Local ids of nodes rendering `(kind, business_id)`
    pub fn nodes_representing(&self, kind: EntityKind, business_id: BusinessId) -> Vec<NodeId> {
        self.read()
            .nodes
            .values()
            .filter(|n| n.represents(kind, business_id))
            .map(|n| n.id.clone())
            .collect()
    }

    /// Derived read-only flag; None for unknown nodes
    pub fn is_read_only(&self, id: &NodeId) -> Option<bool> {
        let state = self.read();
        state.nodes.get(id).map(|n| n.is_read_only(state.active))
    }

    pub fn node_view(&self, id: &NodeId) -> Option<NodeView> {
        let state = self.read();
        state.nodes.get(id).map(|n| NodeView {
            read_only: n.is_read_only(state.active),
            node: n.clone(),
        })
    }

    /// Render records in insertion order with read-only flags for the active installation
    pub fn render_nodes(&self) -> Vec<NodeView> {
        let state = self.read();
        state
            .nodes
            .values()
            .map(|n| NodeView {
                read_only: n.is_read_only(state.active),
                node: n.clone(),
            })
            .collect()
    }

    // ========== Refresh flags ==========

    /// Flag every node for lazy refresh
    pub fn mark_all_needs_refresh(&self) -> usize {
        let count = {
            let mut state = self.write();
            state.nodes.values_mut().for_each(|n| n.needs_refresh = true);
            state.nodes.len()
        };
        if count > 0 {
            self.notify(GraphChange::Nodes);
        }
        count
    }

    /// Flag the nodes rendering `(kind, business_id)`; returns how many matched
    pub fn mark_stale(&self, kind: EntityKind, business_id: BusinessId) -> usize {
        let count = {
            let mut state = self.write();
            let mut count = 0;
            for node in state.nodes.values_mut().filter(|n| n.represents(kind, business_id)) {
                node.needs_refresh = true;
                count += 1;
            }
            count
        };
        if count > 0 {
            self.notify(GraphChange::Nodes);
        }
        count
    }

    pub fn stale_nodes(&self) -> Vec<GraphNode> {
        self.read()
            .nodes
            .values()
            .filter(|n| n.needs_refresh)
            .cloned()
            .collect()
    }

    // ========== Edges ==========

    pub fn insert_edge(&self, edge: GraphEdge) {
        self.write().edges.insert(edge.id.clone(), edge);
        self.notify(GraphChange::Edges);
    }

    pub fn edge(&self, id: &str) -> Option<GraphEdge> {
        self.read().edges.get(id).cloned()
    }

    pub fn edges(&self) -> Vec<GraphEdge> {
        self.read().edges.values().cloned().collect()
    }

    pub fn edge_count(&self) -> usize {
        self.read().edges.len()
    }

    pub fn remove_edge(&self, id: &str) -> Option<GraphEdge> {
        let removed = self.write().edges.shift_remove(id);
        if removed.is_some() {
            self.notify(GraphChange::Edges);
        }
        removed
    }

    /// Swap the edge `old_id` for `edge`, keeping its position.
    /// Returns false (and changes nothing) when `old_id` is gone.
    pub fn replace_edge(&self, old_id: &str, edge: GraphEdge) -> bool {
        let replaced = {
            let mut state = self.write();
            match state.edges.get_index_of(old_id) {
                Some(index) => {
                    state.edges.shift_remove_index(index);
                    state.edges.shift_insert(index, edge.id.clone(), edge);
                    true
                }
                None => false,
            }
        };
        if replaced {
            self.notify(GraphChange::Edges);
        }
        replaced
    }

    /// Is there already an edge with these endpoints and handles?
    pub fn has_edge_between(
        &self,
        source: &NodeId,
        target: &NodeId,
        source_handle: Option<&str>,
        target_handle: Option<&str>,
    ) -> bool {
        self.read()
            .edges
            .values()
            .any(|e| e.connects(source, target, source_handle, target_handle))
    }

    pub fn edges_touching(&self, node: &NodeId) -> Vec<GraphEdge> {
        self.read()
            .edges
            .values()
            .filter(|e| e.touches(node))
            .cloned()
            .collect()
    }

    // ========== Whole-canvas operations ==========

    pub fn is_empty(&self) -> bool {
        let state = self.read();
        state.nodes.is_empty() && state.edges.is_empty()
    }

    /// Replace the full content (rehydration)
    pub fn replace_all(&self, nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) {
        {
            let mut state = self.write();
            state.nodes = nodes.into_iter().map(|n| (n.id.clone(), n)).collect();
            state.edges = edges.into_iter().map(|e| (e.id.clone(), e)).collect();
        }
        self.notify(GraphChange::Reset);
    }

    pub fn clear(&self) {
        self.replace_all(Vec::new(), Vec::new());
    }

    /// Plain-data copy of the canvas for `installation`. Provisional edges are left out.
    pub fn snapshot(&self, installation: InstallationId) -> CanvasSnapshot {
        let state = self.read();
        CanvasSnapshot {
            installation_id: installation,
            nodes: state.nodes.values().cloned().collect(),
            edges: state.edges.values().filter(|e| e.confirmed).cloned().collect(),
            saved_at: chrono::Utc::now(),
        }
    }
}

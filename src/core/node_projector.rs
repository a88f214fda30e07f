//! Builds node records from domain entities and emission readings.
//!
//! Nodes are inserted immediately with a zero snapshot and `needs_refresh` set;
//! the emission read that follows only fills the figures in. A failed or
//! deduplicated read leaves the flag for the next refresh pass, so projection
//! never waits on the network to show a node.
//!
//! Interaction handlers are not data: they are built per node kind by
//! registered factories and re-attached after every rehydration.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use log::{debug, warn};

use super::emission_coordinator::EmissionCoordinator;
use super::graph_store::GraphStore;
use crate::entities::{
    BusinessId, DomainProcess, DomainProduct, EmissionSnapshot, EntityKind, GraphNode, InstallationId, NodeHandlers,
    NodeId, NodeKind, NodeView, ProductEmissionView,
};
use crate::error::EngineError;

/// Builds the runtime handlers of a node
pub type HandlerFactory = Arc<dyn Fn(&GraphNode) -> NodeHandlers + Send + Sync>;

pub struct NodeProjector {
    store: Arc<GraphStore>,
    emissions: Arc<EmissionCoordinator>,
    factories: RwLock<HashMap<NodeKind, HandlerFactory>>,
}

impl NodeProjector {
    pub fn new(store: Arc<GraphStore>, emissions: Arc<EmissionCoordinator>) -> Self {
        Self {
            store,
            emissions,
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Register the handler factory for a node kind (replaces the previous one)
    pub fn set_handler_factory<F>(&self, kind: NodeKind, factory: F)
    where
        F: Fn(&GraphNode) -> NodeHandlers + Send + Sync + 'static,
    {
        self.factories
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(kind, Arc::new(factory));
    }

    fn bind_handlers(&self, node: &mut GraphNode) {
        let factory = self
            .factories
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&node.kind)
            .cloned();
        let handlers = factory.map(|f| f(&*node)).unwrap_or_default();
        node.handlers = handlers;
    }

    /// Re-attach handlers to nodes loaded from a snapshot
    pub fn rehydrate(&self, nodes: Vec<GraphNode>) -> Vec<GraphNode> {
        nodes
            .into_iter()
            .map(|mut node| {
                self.bind_handlers(&mut node);
                node
            })
            .collect()
    }

    /// Existing node for the entity (keeps id and position) or a fresh one
    fn base_node(&self, kind: NodeKind, entity: EntityKind, fields: &EntityRef<'_>) -> GraphNode {
        let existing = self
            .store
            .nodes_representing(entity, fields.id)
            .first()
            .and_then(|id| self.store.node(id));
        let mut node = existing
            .unwrap_or_else(|| GraphNode::new(kind, Some(fields.id), fields.installation_id));
        node.owner_installation_id = fields.installation_id;
        node.display.label = fields.name.to_string();
        node
    }

    // ========== Projection ==========

    /// Insert or update the node of a process and fetch its emission.
    ///
    /// Fails only with [`EngineError::Stale`] when the active canvas changed
    /// while the emission was being read; the node then belongs to the
    /// previous canvas.
    pub async fn project_process_node(
        &self,
        process: &DomainProcess,
        related_products: &[DomainProduct],
        active: Option<InstallationId>,
    ) -> Result<NodeView, EngineError> {
        let entity = EntityRef {
            id: process.id,
            name: &process.name,
            installation_id: process.installation_id,
        };
        let mut node = self.base_node(NodeKind::Process, EntityKind::Process, &entity);
        node.display.related_products = related_products.iter().map(|p| p.name.clone()).collect();
        node.needs_refresh = true;
        self.bind_handlers(&mut node);
        let node_id = node.id.clone();
        let token = self.store.token();
        self.store.upsert_node(node);

        match self.emissions.get_process_emission(process.id).await {
            Ok(Some(snapshot)) if self.store.is_current(&token) => {
                self.apply_emission_update(&node_id, snapshot);
            }
            Ok(Some(_)) => return Err(EngineError::Stale(token.installation)),
            Ok(None) => debug!("Process {} emission in flight; node stays flagged", process.id),
            Err(e) => warn!("Process {} projected without emission: {}", process.id, e),
        }
        self.view(&node_id, active, token.installation)
    }

    /// Insert or update the node of a product and fetch its emission view
    pub async fn project_product_node(
        &self,
        product: &DomainProduct,
        active: Option<InstallationId>,
    ) -> Result<NodeView, EngineError> {
        let entity = EntityRef {
            id: product.id,
            name: &product.name,
            installation_id: product.installation_id,
        };
        let mut node = self.base_node(NodeKind::Product, EntityKind::Product, &entity);
        node.display.subtitle = product.hs_code.clone();
        node.needs_refresh = true;
        self.bind_handlers(&mut node);
        let node_id = node.id.clone();
        let token = self.store.token();
        self.store.upsert_node(node);

        match self.emissions.get_product_emission(product.id).await {
            Ok(Some(view)) if self.store.is_current(&token) => {
                self.apply_product_update(&node_id, &view);
            }
            Ok(Some(_)) => return Err(EngineError::Stale(token.installation)),
            Ok(None) => debug!("Product {} emission in flight; node stays flagged", product.id),
            Err(e) => warn!("Product {} projected without emission: {}", product.id, e),
        }
        self.view(&node_id, active, token.installation)
    }

    fn view(
        &self,
        node_id: &NodeId,
        active: Option<InstallationId>,
        captured: Option<InstallationId>,
    ) -> Result<NodeView, EngineError> {
        let node = self.store.node(node_id).ok_or(EngineError::Stale(captured))?;
        Ok(NodeView {
            read_only: node.is_read_only(active),
            node,
        })
    }

    // ========== Updates ==========

    /// Merge a process snapshot into the node and clear its refresh flag.
    /// Applying the same snapshot twice leaves the node unchanged.
    pub fn apply_emission_update(&self, node_id: &NodeId, snapshot: EmissionSnapshot) -> bool {
        self.store.update_node(node_id, |node| {
            let computed_at = snapshot.computed_at.or(node.emission.computed_at);
            node.emission = EmissionSnapshot { computed_at, ..snapshot };
            node.needs_refresh = false;
        })
    }

    /// Merge a product reading into the node and clear its refresh flag
    pub fn apply_product_update(&self, node_id: &NodeId, view: &ProductEmissionView) -> bool {
        self.store.update_node(node_id, |node| {
            node.emission.attributed_emission = view.attributed_emission;
            node.emission.cumulative_emission = view.attributed_emission;
            node.emission.computed_at = Some(Utc::now());
            node.display.has_produce_edge = view.has_produce_edge;
            if view.quantities.is_some() {
                node.display.quantities = view.quantities;
            }
            node.needs_refresh = false;
        })
    }
}

/// Fields shared by processes and products for node construction
struct EntityRef<'a> {
    id: BusinessId,
    name: &'a str,
    installation_id: InstallationId,
}

//! Application module - GraphSync facade and related functionality.
//!
//! This module organizes the host-facing engine into focused submodules:
//! - `events` - Event wiring (bus channels → refresh flags) and user notices
//! - `refresh` - Lazy refetch of nodes flagged `needs_refresh`
//! - `canvas_io` - Installation switching, autosave and shutdown

mod canvas_io;
mod events;
mod refresh;

pub use refresh::RefreshReport;

use std::sync::Arc;

use log::{debug, info};

use crate::core::canvas_persistence::{CanvasPersistence, SnapshotStore};
use crate::core::edge_coordinator::{CreateEdgeOutcome, DeleteReport, EdgeCoordinator};
use crate::core::emission_coordinator::EmissionCoordinator;
use crate::core::event_bus::{EventBus, Subscription};
use crate::core::graph_events::{RefreshAllNodesAfterProductUpdate, RefreshProduct};
use crate::core::graph_store::{GraphStore, InstallationToken};
use crate::core::node_projector::NodeProjector;
use crate::entities::{
    BackendEdgeId, BusinessId, DomainProcess, DomainProduct, EmissionSnapshot, InstallationId, NodeId,
    NodeView, ProductEmissionView,
};
use crate::error::EngineError;
use crate::remote::EmissionApi;
use crate::settings::EngineSettings;

/// Graph synchronization engine for one host (one canvas at a time).
///
/// Owns the store, the coordinators and the persistence layer, and keeps the
/// bus subscriptions that turn recalculation events into refresh flags alive
/// for as long as it exists.
pub struct GraphSync {
    settings: EngineSettings,
    bus: EventBus,
    store: Arc<GraphStore>,
    emissions: Arc<EmissionCoordinator>,
    edges: EdgeCoordinator,
    projector: Arc<NodeProjector>,
    persistence: Arc<CanvasPersistence>,
    subscriptions: Vec<Subscription>,
}

impl std::fmt::Debug for GraphSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphSync")
            .field("store", &self.store)
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

impl GraphSync {
    pub fn new(
        api: Arc<dyn EmissionApi>,
        snapshots: Arc<dyn SnapshotStore>,
        settings: EngineSettings,
    ) -> Self {
        let bus = EventBus::new();
        let store = Arc::new(GraphStore::new());
        let emissions = Arc::new(EmissionCoordinator::new(Arc::clone(&api), bus.clone(), &settings));
        let edges = EdgeCoordinator::new(Arc::clone(&store), Arc::clone(&emissions), api, bus.clone());
        let projector = Arc::new(NodeProjector::new(Arc::clone(&store), Arc::clone(&emissions)));
        let persistence = Arc::new(CanvasPersistence::new(
            Arc::clone(&store),
            Arc::clone(&projector),
            snapshots,
            settings.persist_debounce_ms,
        ));
        persistence.attach();

        let subscriptions = events::wire_refresh_flags(&bus, &store);
        info!("GraphSync ready ({} event subscriptions)", subscriptions.len());

        Self {
            settings,
            bus,
            store,
            emissions,
            edges,
            projector,
            persistence,
            subscriptions,
        }
    }

    // ========== Accessors ==========

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Store for reading and subscribing to changes
    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn emissions(&self) -> &EmissionCoordinator {
        &self.emissions
    }

    /// Projector, for registering handler factories
    pub fn projector(&self) -> &NodeProjector {
        &self.projector
    }

    pub fn active_installation(&self) -> Option<InstallationId> {
        self.store.active_installation()
    }

    /// Change the active installation without swapping the canvas.
    /// Read-only flags follow immediately; nothing is written.
    pub fn set_active_installation(&self, installation: Option<InstallationId>) -> InstallationToken {
        self.store.set_active_installation(installation)
    }

    pub fn render_nodes(&self) -> Vec<NodeView> {
        self.store.render_nodes()
    }

    // ========== Edges ==========

    pub async fn create_edge(
        &self,
        source: &NodeId,
        target: &NodeId,
        source_handle: Option<&str>,
        target_handle: Option<&str>,
    ) -> Result<CreateEdgeOutcome, EngineError> {
        self.edges.create_edge(source, target, source_handle, target_handle).await
    }

    pub async fn delete_edges(&self, edge_ids: &[String]) -> DeleteReport {
        self.edges.delete_edges(edge_ids).await
    }

    // ========== Nodes ==========

    pub async fn add_process_node(
        &self,
        process: &DomainProcess,
        related_products: &[DomainProduct],
    ) -> Result<NodeView, EngineError> {
        self.projector
            .project_process_node(process, related_products, self.store.active_installation())
            .await
    }

    pub async fn add_product_node(&self, product: &DomainProduct) -> Result<NodeView, EngineError> {
        self.projector
            .project_product_node(product, self.store.active_installation())
            .await
    }

    /// Remove a node together with its edges. Returns None for unknown nodes.
    pub async fn remove_node(&self, node_id: &NodeId) -> Option<DeleteReport> {
        self.store.node(node_id)?;
        let touching: Vec<_> = self
            .store
            .edges_touching(node_id)
            .into_iter()
            .filter_map(|e| self.store.remove_edge(&e.id))
            .collect();
        self.store.remove_node(node_id);
        debug!("Removed node {} and {} edge(s)", node_id, touching.len());
        Some(self.edges.delete_removed_edges(&touching).await)
    }

    // ========== Emissions ==========

    pub async fn get_process_emission(&self, id: BusinessId) -> Result<Option<EmissionSnapshot>, EngineError> {
        self.emissions.get_process_emission(id).await
    }

    pub async fn get_product_emission(&self, id: BusinessId) -> Result<Option<ProductEmissionView>, EngineError> {
        self.emissions.get_product_emission(id).await
    }

    pub async fn recalculate_whole_graph(&self, trigger: Option<BackendEdgeId>) -> Result<(), EngineError> {
        self.emissions.recalculate_whole_graph(trigger).await
    }

    pub async fn recalculate_from_process(&self, id: BusinessId) -> Result<(), EngineError> {
        self.emissions.recalculate_from_process(id).await
    }

    /// A product record was edited elsewhere. `affects_graph` is true when the
    /// change can move figures of other nodes (e.g. quantities used for allocation).
    pub fn notify_product_updated(&self, product_id: BusinessId, affects_graph: bool) {
        if affects_graph {
            self.emissions.clear_cache();
            self.bus.emit(RefreshAllNodesAfterProductUpdate);
        } else {
            self.bus.emit(RefreshProduct(product_id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::canvas_persistence::MemorySnapshotStore;
    use crate::core::graph_events::UserNotice;
    use crate::entities::{EdgeKind, NodeKind, ProductQuantities};
    use crate::error::ErrorCategory;
    use crate::remote::ApiError;
    use crate::remote::testing::FakeService;

    pub(super) struct Fixture {
        pub api: Arc<FakeService>,
        pub snapshots: Arc<MemorySnapshotStore>,
        pub sync: GraphSync,
    }

    pub(super) fn fixture(api: FakeService) -> Fixture {
        let api = Arc::new(api);
        let snapshots = Arc::new(MemorySnapshotStore::new());
        let dyn_api: Arc<dyn EmissionApi> = api.clone();
        let dyn_snapshots: Arc<dyn SnapshotStore> = snapshots.clone();
        let sync = GraphSync::new(dyn_api, dyn_snapshots, EngineSettings::default());
        sync.switch_installation(InstallationId(1));
        Fixture { api, snapshots, sync }
    }

    pub(super) fn process(id: i64) -> DomainProcess {
        DomainProcess {
            id: BusinessId(id),
            name: format!("Process {}", id),
            installation_id: InstallationId(1),
        }
    }

    pub(super) fn product(id: i64) -> DomainProduct {
        DomainProduct {
            id: BusinessId(id),
            name: format!("Product {}", id),
            installation_id: InstallationId(1),
            hs_code: None,
        }
    }

    #[tokio::test]
    async fn test_create_then_delete_leaves_no_edges_and_one_recalculation() {
        let f = fixture(FakeService::new().with_process(1, Some(1.0), 1.0, 0.0).with_process(2, Some(2.0), 2.0, 0.0));
        let a = f.sync.add_process_node(&process(1), &[]).await.unwrap().node.id;
        let b = f.sync.add_process_node(&process(2), &[]).await.unwrap().node.id;

        let CreateEdgeOutcome::Confirmed(edge) = f.sync.create_edge(&a, &b, None, None).await.unwrap() else {
            panic!("edge not confirmed");
        };
        let report = f.sync.delete_edges(&[edge.id]).await;

        assert!(report.recalculated);
        assert_eq!(f.sync.store().edge_count(), 0);
        assert_eq!(f.api.calls("recalculate_graph"), 1);
    }

    #[tokio::test]
    async fn test_product_follows_new_produce_edge() {
        let f = fixture(
            FakeService::new()
                .with_process(1, Some(50.0), 50.0, 0.0)
                .with_product(9, None, ProductQuantities::default()),
        );
        let a = f.sync.add_process_node(&process(1), &[]).await.unwrap().node.id;
        let p = f.sync.add_product_node(&product(9)).await.unwrap();
        assert_eq!(p.node.emission.attributed_emission, 0.0);
        assert!(!p.node.display.has_produce_edge);

        f.sync.create_edge(&a, &p.node.id, None, None).await.unwrap();
        let flagged: Vec<_> = f.sync.store().stale_nodes().into_iter().map(|n| n.kind).collect();
        assert!(flagged.contains(&NodeKind::Product));

        let report = f.sync.refresh_stale_nodes().await;
        assert_eq!(report.failed, 0);
        let p = f.sync.store().node(&p.node.id).unwrap();
        assert_eq!(p.emission.attributed_emission, 50.0);
        assert!(p.display.has_produce_edge);
        assert!(!p.needs_refresh);
    }

    #[tokio::test]
    async fn test_rejected_edge_is_reported_once() {
        let f = fixture(FakeService::new().with_process(1, Some(1.0), 1.0, 0.0).with_process(2, Some(2.0), 2.0, 0.0));
        f.api.fail("create_edge", ApiError::Rejected { status: 400, message: "Not allowed".into() });
        let a = f.sync.add_process_node(&process(1), &[]).await.unwrap().node.id;
        let b = f.sync.add_process_node(&process(2), &[]).await.unwrap().node.id;
        f.sync.drain_notices();

        assert!(f.sync.create_edge(&a, &b, None, None).await.is_err());

        assert_eq!(f.sync.store().edge_count(), 0);
        assert_eq!(f.api.calls("recalculate_process"), 0);
        assert_eq!(
            f.sync.drain_notices(),
            vec![UserNotice { category: ErrorCategory::Validation, message: "Not allowed".into() }]
        );
        assert!(f.sync.drain_notices().is_empty());
    }

    #[tokio::test]
    async fn test_recalculated_process_is_flagged() {
        let f = fixture(FakeService::new().with_process(1, Some(1.0), 1.0, 0.0));
        let a = f.sync.add_process_node(&process(1), &[]).await.unwrap().node.id;
        assert!(f.sync.store().stale_nodes().is_empty());

        f.sync.recalculate_from_process(BusinessId(1)).await.unwrap();
        assert_eq!(f.sync.store().stale_nodes()[0].id, a);
    }

    #[tokio::test]
    async fn test_product_update_scopes() {
        let f = fixture(
            FakeService::new()
                .with_process(1, Some(1.0), 1.0, 0.0)
                .with_product(9, None, ProductQuantities::default()),
        );
        f.sync.add_process_node(&process(1), &[]).await.unwrap();
        f.sync.add_product_node(&product(9)).await.unwrap();

        f.sync.notify_product_updated(BusinessId(9), false);
        let stale = f.sync.store().stale_nodes();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].kind, NodeKind::Product);

        f.sync.notify_product_updated(BusinessId(9), true);
        assert_eq!(f.sync.store().stale_nodes().len(), 2);
    }

    #[tokio::test]
    async fn test_remove_node_cascades_edges() {
        let f = fixture(FakeService::new().with_process(1, Some(1.0), 1.0, 0.0).with_process(2, Some(2.0), 2.0, 0.0));
        let a = f.sync.add_process_node(&process(1), &[]).await.unwrap().node.id;
        let b = f.sync.add_process_node(&process(2), &[]).await.unwrap().node.id;
        f.sync.create_edge(&a, &b, None, None).await.unwrap();

        let report = f.sync.remove_node(&a).await.unwrap();

        assert_eq!(report.removed, 1);
        assert_eq!(f.api.edge_count(), 0);
        assert_eq!(f.sync.store().node_count(), 1);
        assert_eq!(f.sync.store().edge_count(), 0);
        assert!(f.sync.remove_node(&a).await.is_none());
    }

    #[tokio::test]
    async fn test_edge_kinds_of_confirmed_edges_match_endpoints() {
        let f = fixture(
            FakeService::new()
                .with_process(1, Some(1.0), 1.0, 0.0)
                .with_product(9, None, ProductQuantities::default()),
        );
        let a = f.sync.add_process_node(&process(1), &[]).await.unwrap().node.id;
        let p = f.sync.add_product_node(&product(9)).await.unwrap().node.id;
        f.sync.create_edge(&p, &a, None, None).await.unwrap();

        let edges = f.sync.store().edges();
        assert_eq!(edges[0].kind, EdgeKind::Consume);
        assert_eq!(f.api.calls("recalculate_process"), 1);
    }
}

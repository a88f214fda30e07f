//! Optimistic edge creation and deletion.
//!
//! Creation runs a fixed sequence per edge:
//! classification → provisional insert → endpoint resolution → `POST /edges` →
//! in-place confirmation → scoped propagation → [`EdgePropagationComplete`].
//!
//! A rejected connection never enters the store, so every stored edge carries
//! the kind its endpoints imply.
//!
//! The provisional edge is owned by a drop guard from the moment it is inserted,
//! so every early return, error or cancelled future removes it. Only a
//! successful in-place confirmation disarms the guard.
//!
//! Propagation after a create is scoped to one anchor process (target of
//! `continue`, producer of `produce`, consumer of `consume`). Full-graph
//! recalculation is reserved for deletions.

use std::sync::Arc;

use log::{debug, info, warn};

use super::edge_validator;
use super::emission_coordinator::EmissionCoordinator;
use super::event_bus::EventBus;
use super::graph_events::{EdgePropagationComplete, UserNotice};
use super::graph_store::GraphStore;
use crate::entities::{BackendEdgeId, BusinessId, EdgeKind, GraphEdge, NodeId, NodeKind};
use crate::error::EngineError;
use crate::remote::{CreateEdgeRequest, EmissionApi};

/// Result of [`EdgeCoordinator::create_edge`]
#[derive(Debug, Clone, PartialEq)]
pub enum CreateEdgeOutcome {
    /// An identical edge already exists; nothing was sent
    Duplicate,
    /// Server acknowledged; the provisional edge was replaced in place
    Confirmed(GraphEdge),
    /// Server acknowledged but the local canvas moved on (installation switch,
    /// or the provisional edge was removed meanwhile)
    Discarded,
}

/// Summary of a [`EdgeCoordinator::delete_edges`] batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteReport {
    /// Edges removed from the local store
    pub removed: usize,
    /// Backend deletions that succeeded (or found the edge already gone)
    pub remote_deleted: usize,
    /// Backend deletions that failed and were skipped
    pub remote_failed: usize,
    /// Full-graph recalculation succeeded and nodes were flagged for refresh
    pub recalculated: bool,
}

/// Removes the provisional edge on drop unless committed
struct ProvisionalGuard<'a> {
    store: &'a GraphStore,
    edge_id: String,
    committed: bool,
}

impl ProvisionalGuard<'_> {
    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for ProvisionalGuard<'_> {
    fn drop(&mut self) {
        if !self.committed && self.store.remove_edge(&self.edge_id).is_some() {
            debug!("Rolled back provisional edge {}", self.edge_id);
        }
    }
}

/// Resolved edge endpoint
#[derive(Debug, Clone, Copy)]
struct Endpoint {
    kind: NodeKind,
    business_id: BusinessId,
}

pub struct EdgeCoordinator {
    store: Arc<GraphStore>,
    emissions: Arc<EmissionCoordinator>,
    api: Arc<dyn EmissionApi>,
    bus: EventBus,
}

impl EdgeCoordinator {
    pub fn new(
        store: Arc<GraphStore>,
        emissions: Arc<EmissionCoordinator>,
        api: Arc<dyn EmissionApi>,
        bus: EventBus,
    ) -> Self {
        Self { store, emissions, api, bus }
    }

    // ========== Create ==========

    /// Connect two nodes. Failures are also published as a [`UserNotice`]
    /// when the user can act on them.
    pub async fn create_edge(
        &self,
        source: &NodeId,
        target: &NodeId,
        source_handle: Option<&str>,
        target_handle: Option<&str>,
    ) -> Result<CreateEdgeOutcome, EngineError> {
        let result = self.try_create_edge(source, target, source_handle, target_handle).await;
        if let Err(e) = &result {
            warn!("Edge {} -> {} not created: {}", source, target, e);
            self.notify_user(e);
        }
        result
    }

    async fn try_create_edge(
        &self,
        source: &NodeId,
        target: &NodeId,
        source_handle: Option<&str>,
        target_handle: Option<&str>,
    ) -> Result<CreateEdgeOutcome, EngineError> {
        if self.store.has_edge_between(source, target, source_handle, target_handle) {
            debug!("Edge {} -> {} already exists", source, target);
            return Ok(CreateEdgeOutcome::Duplicate);
        }

        // Classify first so every stored edge, provisional or not, carries its kind
        let source_kind = self.node_kind(source)?;
        let target_kind = self.node_kind(target)?;
        let classification = edge_validator::classify(source, source_kind, target, target_kind);
        let kind = match (classification.valid, classification.kind) {
            (true, Some(kind)) => kind,
            _ => {
                let reason = classification.reason.unwrap_or(edge_validator::REASON_UNSUPPORTED);
                return Err(EngineError::Validation(reason.to_string()));
            }
        };

        let token = self.store.token();
        let provisional =
            GraphEdge::provisional(source.clone(), target.clone(), kind, source_handle, target_handle);
        let guard = ProvisionalGuard {
            store: self.store.as_ref(),
            edge_id: provisional.id.clone(),
            committed: false,
        };
        self.store.insert_edge(provisional.clone());

        let from = self.endpoint(source)?;
        let to = self.endpoint(target)?;
        let request = CreateEdgeRequest {
            source_kind: from.kind,
            source_id: from.business_id,
            target_kind: to.kind,
            target_id: to.business_id,
            edge_kind: kind,
        };
        let created = self.api.create_edge(&request).await.map_err(EngineError::from_api)?;

        if !self.store.is_current(&token) {
            info!(
                "Edge {} confirmed after installation switch; dropping local copy",
                created.id
            );
            self.propagate(kind, from, to).await;
            return Ok(CreateEdgeOutcome::Discarded);
        }

        let Some(current) = self.store.edge(&provisional.id) else {
            info!("Provisional edge {} was removed before confirmation", provisional.id);
            if let Err(e) = self.api.delete_edge(created.id).await {
                warn!("Orphaned backend edge {} not deleted: {}", created.id, e);
            }
            return Ok(CreateEdgeOutcome::Discarded);
        };
        let confirmed = current.confirmed(created.id);
        if !self.store.replace_edge(&provisional.id, confirmed.clone()) {
            return Ok(CreateEdgeOutcome::Discarded);
        }
        guard.commit();
        info!("Edge {} confirmed ({})", confirmed.id, kind);

        self.propagate(kind, from, to).await;
        Ok(CreateEdgeOutcome::Confirmed(confirmed))
    }

    fn node_kind(&self, id: &NodeId) -> Result<NodeKind, EngineError> {
        self.store
            .node(id)
            .map(|n| n.kind)
            .ok_or_else(|| EngineError::UnresolvedEndpoint(id.clone()))
    }

    fn endpoint(&self, id: &NodeId) -> Result<Endpoint, EngineError> {
        self.store
            .node(id)
            .and_then(|n| n.business_id.map(|business_id| Endpoint { kind: n.kind, business_id }))
            .ok_or_else(|| EngineError::UnresolvedEndpoint(id.clone()))
    }

    /// Scoped recalculation of the anchor process, then notify listeners.
    /// The event is published even when the recalculation failed so nodes
    /// still refetch whatever the server has.
    async fn propagate(&self, kind: EdgeKind, source: Endpoint, target: Endpoint) {
        let anchor = match kind {
            EdgeKind::Continue | EdgeKind::Consume => target.business_id,
            EdgeKind::Produce => source.business_id,
        };
        if let Err(e) = self.emissions.recalculate_process_scoped(anchor).await {
            warn!("Propagation of {} edge via process {} failed: {}", kind, anchor, e);
        }
        for endpoint in [source, target] {
            if endpoint.kind == NodeKind::Process {
                self.emissions.invalidate_process(endpoint.business_id);
            }
        }
        self.bus.emit(EdgePropagationComplete {
            edge_kind: kind,
            source_business_id: source.business_id,
            target_business_id: target.business_id,
        });
    }

    // ========== Delete ==========

    /// Remove edges by local id, delete them server-side and recalculate the graph once
    pub async fn delete_edges(&self, edge_ids: &[String]) -> DeleteReport {
        let removed: Vec<GraphEdge> = edge_ids
            .iter()
            .filter_map(|id| self.store.remove_edge(id))
            .collect();
        self.delete_removed_edges(&removed).await
    }

    /// Server-side half of [`delete_edges`](Self::delete_edges) for edges the
    /// host already removed from the store
    pub async fn delete_removed_edges(&self, removed: &[GraphEdge]) -> DeleteReport {
        let mut report = DeleteReport { removed: removed.len(), ..Default::default() };
        if removed.is_empty() {
            return report;
        }

        let backend_ids: Vec<BackendEdgeId> = removed.iter().filter_map(|e| e.backend_id).collect();
        for id in &backend_ids {
            match self.api.delete_edge(*id).await {
                Ok(()) => report.remote_deleted += 1,
                Err(e) if e.is_not_found() => {
                    debug!("Backend edge {} already gone", id);
                    report.remote_deleted += 1;
                }
                Err(e) => {
                    warn!("Backend edge {} not deleted: {}", id, e);
                    report.remote_failed += 1;
                }
            }
        }

        let trigger = match backend_ids.as_slice() {
            [single] => Some(*single),
            _ => None,
        };
        match self.emissions.recalculate_whole_graph(trigger).await {
            Ok(()) => {
                let flagged = self.store.mark_all_needs_refresh();
                debug!("Deleted {} edge(s); {} node(s) flagged for refresh", removed.len(), flagged);
                report.recalculated = true;
            }
            Err(e) => {
                warn!("Recalculation after edge deletion failed: {}", e);
                self.notify_user(&e);
            }
        }
        report
    }

    fn notify_user(&self, error: &EngineError) {
        if let Some(message) = error.user_message() {
            self.bus.emit(UserNotice { category: error.category(), message });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{GraphNode, InstallationId, ProductQuantities};
    use crate::error::ErrorCategory;
    use crate::remote::ApiError;
    use crate::remote::testing::FakeService;
    use crate::settings::EngineSettings;
    use std::sync::Mutex;

    struct Fixture {
        api: Arc<FakeService>,
        store: Arc<GraphStore>,
        bus: EventBus,
        edges: EdgeCoordinator,
    }

    fn fixture(api: FakeService) -> Fixture {
        let api = Arc::new(api);
        let dyn_api: Arc<dyn EmissionApi> = api.clone();
        let bus = EventBus::new();
        let store = Arc::new(GraphStore::new());
        store.set_active_installation(Some(InstallationId(1)));
        let emissions = Arc::new(EmissionCoordinator::new(
            Arc::clone(&dyn_api),
            bus.clone(),
            &EngineSettings::default(),
        ));
        let edges = EdgeCoordinator::new(Arc::clone(&store), emissions, dyn_api, bus.clone());
        Fixture { api, store, bus, edges }
    }

    fn add(store: &GraphStore, id: &str, kind: NodeKind, business: i64) {
        store.upsert_node(GraphNode::new(kind, Some(BusinessId(business)), InstallationId(1)).with_id(id));
    }

    fn collect_notices(bus: &EventBus) -> (Arc<Mutex<Vec<UserNotice>>>, crate::core::event_bus::Subscription) {
        let notices = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&notices);
        let sub = bus.subscribe::<UserNotice, _>(move |n| sink.lock().unwrap().push(n.clone()));
        (notices, sub)
    }

    #[tokio::test]
    async fn test_create_then_delete_recalculates_once() {
        let f = fixture(FakeService::new().with_process(1, Some(1.0), 1.0, 0.0).with_process(2, Some(2.0), 2.0, 0.0));
        add(&f.store, "a", NodeKind::Process, 1);
        add(&f.store, "b", NodeKind::Process, 2);

        let outcome = f.edges.create_edge(&"a".into(), &"b".into(), None, None).await.unwrap();
        let CreateEdgeOutcome::Confirmed(edge) = outcome else {
            panic!("expected confirmed edge, got {:?}", outcome);
        };
        assert_eq!(edge.kind, EdgeKind::Continue);
        assert_eq!(edge.id, "e-1");
        assert!(f.store.edges().iter().all(|e| !e.id.starts_with("temp-")));

        let report = f.edges.delete_edges(&[edge.id.clone()]).await;
        assert_eq!(report, DeleteReport { removed: 1, remote_deleted: 1, remote_failed: 0, recalculated: true });
        assert_eq!(f.store.edge_count(), 0);
        assert_eq!(f.api.edge_count(), 0);
        assert_eq!(f.api.calls("recalculate_graph"), 1);
        assert_eq!(f.store.stale_nodes().len(), 2);
    }

    #[tokio::test]
    async fn test_rejected_create_rolls_back_without_propagation() {
        let f = fixture(FakeService::new().with_process(1, Some(1.0), 1.0, 0.0).with_process(2, Some(2.0), 2.0, 0.0));
        f.api.fail("create_edge", ApiError::Rejected { status: 400, message: "Cycle detected".into() });
        add(&f.store, "a", NodeKind::Process, 1);
        add(&f.store, "b", NodeKind::Process, 2);
        let (notices, _sub) = collect_notices(&f.bus);

        let err = f.edges.create_edge(&"a".into(), &"b".into(), None, None).await.unwrap_err();

        assert_eq!(err.category(), ErrorCategory::Validation);
        assert_eq!(f.store.edge_count(), 0);
        assert_eq!(f.api.calls("recalculate_process"), 0);
        assert_eq!(
            *notices.lock().unwrap(),
            vec![UserNotice { category: ErrorCategory::Validation, message: "Cycle detected".into() }]
        );
    }

    #[tokio::test]
    async fn test_pending_edge_already_carries_its_kind() {
        let f = fixture(
            FakeService::new()
                .with_process(1, Some(1.0), 1.0, 0.0)
                .with_product(2, None, ProductQuantities::default()),
        );
        add(&f.store, "a", NodeKind::Process, 1);
        add(&f.store, "p", NodeKind::Product, 2);
        let gate = f.api.gate("create_edge");

        let inspect = async {
            gate.reached().await;
            let edges = f.store.edges();
            assert_eq!(edges.len(), 1);
            assert!(edges[0].is_provisional());
            assert_eq!(edges[0].kind, EdgeKind::Produce);
            gate.release();
        };
        let (a, p): (NodeId, NodeId) = ("a".into(), "p".into());
        let (outcome, ()) = tokio::join!(f.edges.create_edge(&a, &p, None, None), inspect);

        let CreateEdgeOutcome::Confirmed(edge) = outcome.unwrap() else {
            panic!("expected confirmed edge");
        };
        assert_eq!(edge.kind, EdgeKind::Produce);
    }

    #[tokio::test]
    async fn test_transient_failure_gives_retry_message() {
        let f = fixture(FakeService::new());
        f.api.fail("create_edge", ApiError::Server { status: 503 });
        add(&f.store, "a", NodeKind::Process, 1);
        add(&f.store, "p", NodeKind::Product, 2);
        let (notices, _sub) = collect_notices(&f.bus);

        assert!(f.edges.create_edge(&"a".into(), &"p".into(), None, None).await.is_err());
        assert_eq!(f.store.edge_count(), 0);
        let notices = notices.lock().unwrap();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].category, ErrorCategory::Transient);
    }

    #[tokio::test]
    async fn test_illegal_pair_never_reaches_server() {
        let f = fixture(FakeService::new());
        add(&f.store, "p", NodeKind::Product, 1);
        add(&f.store, "q", NodeKind::Product, 2);

        let err = f.edges.create_edge(&"p".into(), &"q".into(), None, None).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(f.api.calls("create_edge"), 0);
        assert_eq!(f.store.edge_count(), 0);

        let err = f.edges.create_edge(&"p".into(), &"p".into(), None, None).await.unwrap_err();
        assert_eq!(err.user_message().as_deref(), Some(edge_validator::REASON_SELF_LOOP));
    }

    #[tokio::test]
    async fn test_unresolved_endpoint_rolls_back() {
        let f = fixture(FakeService::new());
        add(&f.store, "a", NodeKind::Process, 1);
        f.store.upsert_node(GraphNode::new(NodeKind::Process, None, InstallationId(1)).with_id("unsaved"));

        let err = f.edges.create_edge(&"a".into(), &"ghost".into(), None, None).await.unwrap_err();
        assert!(matches!(err, EngineError::UnresolvedEndpoint(_)));
        let err = f.edges.create_edge(&"a".into(), &"unsaved".into(), None, None).await.unwrap_err();
        assert!(matches!(err, EngineError::UnresolvedEndpoint(_)));
        assert_eq!(f.store.edge_count(), 0);
        assert_eq!(f.api.calls("create_edge"), 0);
    }

    #[tokio::test]
    async fn test_duplicate_is_a_no_op() {
        let f = fixture(FakeService::new().with_process(1, Some(1.0), 1.0, 0.0).with_process(2, Some(2.0), 2.0, 0.0));
        add(&f.store, "a", NodeKind::Process, 1);
        add(&f.store, "b", NodeKind::Process, 2);

        f.edges.create_edge(&"a".into(), &"b".into(), Some("out"), Some("in")).await.unwrap();
        let again = f.edges.create_edge(&"a".into(), &"b".into(), Some("out"), Some("in")).await.unwrap();

        assert_eq!(again, CreateEdgeOutcome::Duplicate);
        assert_eq!(f.api.calls("create_edge"), 1);
        assert_eq!(f.store.edge_count(), 1);
    }

    #[tokio::test]
    async fn test_produce_edge_propagates_from_producer() {
        let f = fixture(
            FakeService::new()
                .with_process(1, Some(50.0), 50.0, 0.0)
                .with_product(9, None, ProductQuantities::default()),
        );
        add(&f.store, "a", NodeKind::Process, 1);
        add(&f.store, "p", NodeKind::Product, 9);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let _sub = f.bus.subscribe::<EdgePropagationComplete, _>(move |e| sink.lock().unwrap().push(e.clone()));

        f.edges.create_edge(&"a".into(), &"p".into(), None, None).await.unwrap();

        assert_eq!(f.api.calls("recalculate_process"), 1);
        assert_eq!(f.api.calls("recalculate_graph"), 0);
        assert_eq!(
            *events.lock().unwrap(),
            vec![EdgePropagationComplete {
                edge_kind: EdgeKind::Produce,
                source_business_id: BusinessId(1),
                target_business_id: BusinessId(9),
            }]
        );
    }

    #[tokio::test]
    async fn test_response_after_installation_switch_is_discarded() {
        let f = fixture(FakeService::new().with_process(1, Some(1.0), 1.0, 0.0).with_process(2, Some(2.0), 2.0, 0.0));
        add(&f.store, "a", NodeKind::Process, 1);
        add(&f.store, "b", NodeKind::Process, 2);

        let (a, b) = (NodeId::from("a"), NodeId::from("b"));
        let (outcome, _) = tokio::join!(
            f.edges.create_edge(&a, &b, None, None),
            async { f.store.set_active_installation(Some(InstallationId(2))) }
        );

        assert_eq!(outcome.unwrap(), CreateEdgeOutcome::Discarded);
        assert_eq!(f.store.edge_count(), 0);
        assert_eq!(f.api.edge_count(), 1, "server keeps the edge of the old installation");
    }

    #[tokio::test]
    async fn test_provisional_removed_meanwhile_deletes_backend_edge() {
        let f = fixture(FakeService::new().with_process(1, Some(1.0), 1.0, 0.0).with_process(2, Some(2.0), 2.0, 0.0));
        add(&f.store, "a", NodeKind::Process, 1);
        add(&f.store, "b", NodeKind::Process, 2);

        let (a, b) = (NodeId::from("a"), NodeId::from("b"));
        let (outcome, _) = tokio::join!(
            f.edges.create_edge(&a, &b, None, None),
            async {
                let pending = f.store.edges();
                f.store.remove_edge(&pending[0].id)
            }
        );

        assert_eq!(outcome.unwrap(), CreateEdgeOutcome::Discarded);
        assert_eq!(f.store.edge_count(), 0);
        assert_eq!(f.api.edge_count(), 0);
        assert_eq!(f.api.calls("delete_edge"), 1);
    }

    #[tokio::test]
    async fn test_delete_tolerates_backend_failures() {
        let f = fixture(FakeService::new().with_process(1, Some(1.0), 1.0, 0.0).with_process(2, Some(2.0), 2.0, 0.0));
        add(&f.store, "a", NodeKind::Process, 1);
        add(&f.store, "b", NodeKind::Process, 2);
        f.edges.create_edge(&"a".into(), &"b".into(), None, None).await.unwrap();
        f.edges.create_edge(&"b".into(), &"a".into(), None, None).await.unwrap();
        f.api.fail("delete_edge", ApiError::Server { status: 500 });

        let ids: Vec<String> = f.store.edges().into_iter().map(|e| e.id).collect();
        let report = f.edges.delete_edges(&ids).await;

        assert_eq!(report.removed, 2);
        assert_eq!(report.remote_failed, 2);
        assert!(report.recalculated);
        assert_eq!(f.api.calls("recalculate_graph"), 1);
    }

    #[tokio::test]
    async fn test_failed_recalculation_leaves_nodes_untouched() {
        let f = fixture(FakeService::new().with_process(1, Some(1.0), 1.0, 0.0).with_process(2, Some(2.0), 2.0, 0.0));
        add(&f.store, "a", NodeKind::Process, 1);
        add(&f.store, "b", NodeKind::Process, 2);
        f.edges.create_edge(&"a".into(), &"b".into(), None, None).await.unwrap();
        f.api.fail("recalculate_graph", ApiError::Network("down".into()));
        let (notices, _sub) = collect_notices(&f.bus);

        let report = f.edges.delete_edges(&["e-1".to_string(), "e-404".to_string()]).await;

        assert_eq!(report.removed, 1);
        assert!(!report.recalculated);
        assert!(f.store.stale_nodes().is_empty());
        assert_eq!(notices.lock().unwrap().len(), 1);
    }
}

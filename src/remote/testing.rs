//! Scripted in-memory calculation service for engine tests.
//!
//! Models just enough of the server: stored attributed emissions, material/fuel
//! totals, edges, and a preview that follows `produce` edges. Every call is
//! counted per endpoint and yields once before answering so concurrent callers
//! on a current-thread runtime genuinely interleave.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{
    ApiError, CreateEdgeRequest, CreatedEdge, EmissionApi, ProcessEmissionRecord, ProductPreview,
    ProductRecord, RecalculateRequest,
};
use crate::entities::{BackendEdgeId, BusinessId, EdgeKind, ProductQuantities};

#[derive(Debug, Clone, Copy, Default)]
struct FakeProcess {
    stored: Option<f64>,
    material: f64,
    fuel: f64,
}

impl FakeProcess {
    fn aggregate(&mut self) {
        self.stored = Some(self.material + self.fuel);
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct FakeProduct {
    stored: Option<f64>,
    quantities: ProductQuantities,
}

#[derive(Default)]
struct FakeState {
    processes: HashMap<BusinessId, FakeProcess>,
    products: HashMap<BusinessId, FakeProduct>,
    edges: HashMap<BackendEdgeId, CreateEdgeRequest>,
    next_edge: i64,
    failures: HashMap<&'static str, ApiError>,
}

/// Holds the next answer of one endpoint until released
#[derive(Debug, Default)]
pub(crate) struct Gate {
    reached: Notify,
    release: Notify,
}

impl Gate {
    /// Resolves once the held call has computed its answer
    pub async fn reached(&self) {
        self.reached.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[derive(Default)]
pub(crate) struct FakeService {
    state: Mutex<FakeState>,
    calls: Mutex<HashMap<&'static str, usize>>,
    gates: Mutex<HashMap<&'static str, Arc<Gate>>>,
}

impl FakeService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process with a stored attributed emission (None = never materialized)
    pub fn with_process(self, id: i64, stored: Option<f64>, material: f64, fuel: f64) -> Self {
        self.lock().processes.insert(BusinessId(id), FakeProcess { stored, material, fuel });
        self
    }

    pub fn with_product(self, id: i64, stored: Option<f64>, quantities: ProductQuantities) -> Self {
        self.lock().products.insert(BusinessId(id), FakeProduct { stored, quantities });
        self
    }

    /// Make every call to `endpoint` fail with `error` until cleared
    pub fn fail(&self, endpoint: &'static str, error: ApiError) {
        self.lock().failures.insert(endpoint, error);
    }

    pub fn clear_failure(&self, endpoint: &'static str) {
        self.lock().failures.remove(endpoint);
    }

    /// Hold the next answer of `endpoint` (after its value is read) until released
    pub fn gate(&self, endpoint: &'static str) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.gates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(endpoint, Arc::clone(&gate));
        gate
    }

    pub fn set_fuel(&self, id: i64, fuel: f64) {
        if let Some(process) = self.lock().processes.get_mut(&BusinessId(id)) {
            process.fuel = fuel;
        }
    }

    pub fn calls(&self, endpoint: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(endpoint)
            .copied()
            .unwrap_or(0)
    }

    pub fn edge_count(&self) -> usize {
        self.lock().edges.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn enter(&self, endpoint: &'static str) -> Result<(), ApiError> {
        *self
            .calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(endpoint)
            .or_default() += 1;
        tokio::task::yield_now().await;
        match self.lock().failures.get(endpoint) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn hold(&self, endpoint: &'static str) {
        let gate = self.gates.lock().unwrap_or_else(|e| e.into_inner()).remove(endpoint);
        if let Some(gate) = gate {
            gate.reached.notify_one();
            gate.release.notified().await;
        }
    }
}

#[async_trait]
impl EmissionApi for FakeService {
    async fn create_edge(&self, request: &CreateEdgeRequest) -> Result<CreatedEdge, ApiError> {
        self.enter("create_edge").await?;
        self.hold("create_edge").await;
        let mut state = self.lock();
        state.next_edge += 1;
        let id = BackendEdgeId(state.next_edge);
        state.edges.insert(id, request.clone());
        Ok(CreatedEdge { id })
    }

    async fn delete_edge(&self, id: BackendEdgeId) -> Result<(), ApiError> {
        self.enter("delete_edge").await?;
        match self.lock().edges.remove(&id) {
            Some(_) => Ok(()),
            None => Err(ApiError::NotFound),
        }
    }

    async fn process_emission(&self, id: BusinessId) -> Result<ProcessEmissionRecord, ApiError> {
        self.enter("process_emission").await?;
        let state = self.lock();
        let stored = state
            .processes
            .get(&id)
            .and_then(|p| p.stored)
            .ok_or(ApiError::NotFound)?;
        Ok(ProcessEmissionRecord {
            attributed_emission: stored,
            ..Default::default()
        })
    }

    async fn material_total(&self, id: BusinessId) -> Result<f64, ApiError> {
        self.enter("material_total").await?;
        self.lock().processes.get(&id).map(|p| p.material).ok_or(ApiError::NotFound)
    }

    async fn fuel_total(&self, id: BusinessId) -> Result<f64, ApiError> {
        self.enter("fuel_total").await?;
        let fuel = self.lock().processes.get(&id).map(|p| p.fuel).ok_or(ApiError::NotFound)?;
        self.hold("fuel_total").await;
        Ok(fuel)
    }

    async fn recompute_attributed(&self, id: BusinessId) -> Result<(), ApiError> {
        self.enter("recompute_attributed").await?;
        self.lock()
            .processes
            .get_mut(&id)
            .map(FakeProcess::aggregate)
            .ok_or(ApiError::NotFound)
    }

    async fn product_preview(&self, id: BusinessId) -> Result<ProductPreview, ApiError> {
        self.enter("product_preview").await?;
        let state = self.lock();
        if !state.products.contains_key(&id) {
            return Err(ApiError::NotFound);
        }
        let producers: Vec<BusinessId> = state
            .edges
            .values()
            .filter(|e| e.edge_kind == EdgeKind::Produce && e.target_id == id)
            .map(|e| e.source_id)
            .collect();
        let attributed_emission = producers
            .iter()
            .filter_map(|p| state.processes.get(p))
            .map(|p| p.stored.unwrap_or(p.material + p.fuel))
            .sum();
        Ok(ProductPreview {
            attributed_emission,
            has_produce_edge: !producers.is_empty(),
        })
    }

    async fn product_record(&self, id: BusinessId) -> Result<ProductRecord, ApiError> {
        self.enter("product_record").await?;
        let state = self.lock();
        let product = state.products.get(&id).ok_or(ApiError::NotFound)?;
        Ok(ProductRecord {
            id,
            attributed_emission: product.stored,
            has_produce_edge: None,
            quantities: product.quantities,
        })
    }

    async fn recalculate_graph(&self, _request: &RecalculateRequest) -> Result<(), ApiError> {
        self.enter("recalculate_graph").await?;
        self.lock().processes.values_mut().for_each(FakeProcess::aggregate);
        Ok(())
    }

    async fn recalculate_process(&self, id: BusinessId) -> Result<(), ApiError> {
        self.enter("recalculate_process").await?;
        self.lock()
            .processes
            .get_mut(&id)
            .map(FakeProcess::aggregate)
            .ok_or(ApiError::NotFound)
    }
}

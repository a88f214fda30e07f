//! Emission reads, silent repairs and recalculations.
//!
//! **Why**: a node's figure is owned by the calculation service and may be
//! missing (never aggregated) or drifted (stored attributed value disagrees
//! with the sum of its material and fuel components). This coordinator hides
//! both: it aggregates once on not-found, recomputes once on drift, and only
//! surfaces what the user can act on.
//!
//! **Used by**: EdgeCoordinator (propagation), NodeProjector, GraphSync refresh
//!
//! Process readings are cached for the configured TTL. Product readings are a
//! live computation and are never cached. Both kinds go through the in-flight
//! set, so a duplicate concurrent request returns `Ok(None)` without touching
//! the network.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};

use super::emission_cache::{CacheStats, EmissionCache};
use super::event_bus::EventBus;
use super::graph_events::ProcessRecalculated;
use crate::entities::{
    BackendEdgeId, BusinessId, EmissionSnapshot, EmissionSource, EntityKind, ProductEmissionView,
};
use crate::error::EngineError;
use crate::remote::{EmissionApi, ProcessEmissionRecord, RecalculateRequest};
use crate::settings::EngineSettings;

pub struct EmissionCoordinator {
    api: Arc<dyn EmissionApi>,
    cache: EmissionCache,
    bus: EventBus,
    drift_epsilon: f64,
    include_validation: bool,
}

impl std::fmt::Debug for EmissionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmissionCoordinator")
            .field("cache", &self.cache)
            .field("drift_epsilon", &self.drift_epsilon)
            .finish()
    }
}

impl EmissionCoordinator {
    pub fn new(api: Arc<dyn EmissionApi>, bus: EventBus, settings: &EngineSettings) -> Self {
        Self {
            api,
            cache: EmissionCache::new(settings.process_ttl()),
            bus,
            drift_epsilon: settings.drift_epsilon,
            include_validation: settings.include_validation,
        }
    }

    pub fn cache_stats(&self) -> &CacheStats {
        self.cache.stats()
    }

    pub fn invalidate_process(&self, id: BusinessId) {
        self.cache.invalidate_process(id);
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    // ========== Process ==========

    /// Current emission of a process.
    ///
    /// `Ok(None)` means another fetch for the same process is already running;
    /// the caller should keep its refresh flag and try again later.
    pub async fn get_process_emission(
        &self,
        id: BusinessId,
    ) -> Result<Option<EmissionSnapshot>, EngineError> {
        let Some(in_flight) = self.cache.try_begin(EntityKind::Process, id) else {
            debug!("Process {} emission already in flight", id);
            return Ok(None);
        };
        if let Some(cached) = self.cache.get_process(id) {
            return Ok(Some(cached));
        }

        let record = self.read_process(id).await?;
        let snapshot = self.reconcile_drift(id, record).await;
        // A recalculation that finished meanwhile makes this reading stale for later callers
        self.cache.put_process_if_current(id, snapshot, in_flight.generation());
        debug!("Process {} emission: {:.3}", id, snapshot.attributed_emission);
        Ok(Some(snapshot))
    }

    /// Read the stored emission, aggregating once when it was never materialized
    async fn read_process(&self, id: BusinessId) -> Result<ProcessEmissionRecord, EngineError> {
        let as_read_error = |e| EngineError::from_read(e, EntityKind::Process, id);
        match self.api.process_emission(id).await {
            Ok(record) => Ok(record),
            Err(e) if e.is_not_found() => {
                debug!("Process {} has no stored emission, aggregating", id);
                self.api.recompute_attributed(id).await.map_err(as_read_error)?;
                self.api.process_emission(id).await.map_err(as_read_error)
            }
            Err(e) => Err(as_read_error(e)),
        }
    }

    /// Compare the stored value with material + fuel and recompute once when they drift.
    /// Every step here is advisory: failures keep the value already read.
    async fn reconcile_drift(&self, id: BusinessId, record: ProcessEmissionRecord) -> EmissionSnapshot {
        let (material, fuel) = tokio::join!(self.api.material_total(id), self.api.fuel_total(id));
        let totals = match (material, fuel) {
            (Ok(material), Ok(fuel)) => Some((material, fuel)),
            (Err(e), _) | (_, Err(e)) => {
                warn!("Process {}: direct totals unavailable ({}), skipping drift check", id, e);
                None
            }
        };

        let mut record = record;
        if let Some((material, fuel)) = totals {
            let drift = (material + fuel - record.attributed_emission).abs();
            if drift > self.drift_epsilon {
                debug!(
                    "Process {} drifted: stored {:.3}, components {:.3}; recomputing",
                    id,
                    record.attributed_emission,
                    material + fuel
                );
                match self.api.recompute_attributed(id).await {
                    Ok(()) => match self.api.process_emission(id).await {
                        Ok(fresh) => record = fresh,
                        Err(e) => warn!("Process {}: re-read after recompute failed: {}", id, e),
                    },
                    Err(e) => warn!("Process {}: drift recompute failed: {}", id, e),
                }
            }
        }
        normalize(record, totals)
    }

    // ========== Product ==========

    /// Current emission view of a product; `Ok(None)` while another fetch runs.
    ///
    /// The live preview is authoritative. When it fails, the stored value of the
    /// product record is used instead. Quantities come from the record and are
    /// absent when only the record fails.
    pub async fn get_product_emission(
        &self,
        id: BusinessId,
    ) -> Result<Option<ProductEmissionView>, EngineError> {
        let Some(_in_flight) = self.cache.try_begin(EntityKind::Product, id) else {
            debug!("Product {} emission already in flight", id);
            return Ok(None);
        };

        let (preview, record) = tokio::join!(self.api.product_preview(id), self.api.product_record(id));
        let quantities = match &record {
            Ok(record) => Some(record.quantities),
            Err(e) => {
                debug!("Product {}: record unavailable ({})", id, e);
                None
            }
        };

        match (preview, record) {
            (Ok(preview), _) => Ok(Some(ProductEmissionView {
                product_id: id,
                attributed_emission: preview.attributed_emission,
                has_produce_edge: preview.has_produce_edge,
                source: EmissionSource::Preview,
                quantities,
            })),
            (Err(e), Ok(record)) => {
                warn!("Product {}: preview failed ({}), using stored record", id, e);
                Ok(Some(ProductEmissionView {
                    product_id: id,
                    attributed_emission: record.attributed_emission.unwrap_or(0.0),
                    has_produce_edge: record.has_produce_edge.unwrap_or(false),
                    source: EmissionSource::StoredRecord,
                    quantities,
                }))
            }
            (Err(e), Err(_)) => Err(EngineError::from_read(e, EntityKind::Product, id)),
        }
    }

    // ========== Recalculation ==========

    /// Full-graph recalculation. Clears every cached reading on success.
    pub async fn recalculate_whole_graph(&self, trigger: Option<BackendEdgeId>) -> Result<(), EngineError> {
        let request = RecalculateRequest {
            trigger_edge_id: trigger,
            include_validation: self.include_validation,
        };
        self.api
            .recalculate_graph(&request)
            .await
            .map_err(EngineError::from_api)?;
        self.cache.clear();
        info!("Graph recalculated (trigger edge {:?})", trigger);
        Ok(())
    }

    /// Scoped recalculation of one process; drops its cached reading.
    pub async fn recalculate_process_scoped(&self, id: BusinessId) -> Result<(), EngineError> {
        self.api
            .recalculate_process(id)
            .await
            .map_err(|e| EngineError::from_read(e, EntityKind::Process, id))?;
        self.cache.invalidate_process(id);
        debug!("Process {} recalculated (scoped)", id);
        Ok(())
    }

    /// Scoped recalculation, then a best-effort full propagation.
    /// Publishes [`ProcessRecalculated`] once the scoped step succeeded.
    pub async fn recalculate_from_process(&self, id: BusinessId) -> Result<(), EngineError> {
        self.recalculate_process_scoped(id).await?;
        if let Err(e) = self.recalculate_whole_graph(None).await {
            warn!("Process {}: full propagation failed: {}", id, e);
        }
        self.bus.emit(ProcessRecalculated(id));
        Ok(())
    }
}

/// Fill optional fields: cumulative defaults to attributed, components come from
/// the fetched totals when present.
fn normalize(record: ProcessEmissionRecord, totals: Option<(f64, f64)>) -> EmissionSnapshot {
    EmissionSnapshot {
        attributed_emission: record.attributed_emission,
        cumulative_emission: record.cumulative_emission.unwrap_or(record.attributed_emission),
        total_material_direct_emission: totals
            .map(|(m, _)| m)
            .or(record.total_material_direct_emission)
            .unwrap_or(0.0),
        total_fuel_direct_emission: totals
            .map(|(_, f)| f)
            .or(record.total_fuel_direct_emission)
            .unwrap_or(0.0),
        computed_at: record.computed_at.or_else(|| Some(Utc::now())),
    }
}

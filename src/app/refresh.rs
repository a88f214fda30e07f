//! Lazy refresh of nodes flagged `needs_refresh`.
//!
//! Results are applied only while the store still belongs to the installation
//! and epoch captured when the pass started. A `None` reading (fetch already
//! in flight) keeps the flag for the next pass.

use log::{debug, warn};

use super::GraphSync;
use crate::core::graph_store::InstallationToken;
use crate::entities::{EntityKind, GraphNode};

/// Outcome of one [`GraphSync::refresh_stale_nodes`] pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub refreshed: usize,
    /// Another fetch was in flight; flag kept
    pub deferred: usize,
    /// Read failed; flag kept
    pub failed: usize,
    /// Canvas changed mid-pass; result dropped
    pub discarded: usize,
}

enum NodeRefresh {
    Applied,
    Deferred,
    Failed,
    Stale,
}

impl GraphSync {
    /// Refetch every flagged node once
    pub async fn refresh_stale_nodes(&self) -> RefreshReport {
        let token = self.store.token();
        let mut report = RefreshReport::default();

        for node in self.store.stale_nodes() {
            match self.refresh_node(&node, &token).await {
                NodeRefresh::Applied => report.refreshed += 1,
                NodeRefresh::Deferred => report.deferred += 1,
                NodeRefresh::Failed => report.failed += 1,
                NodeRefresh::Stale => {
                    debug!("Canvas switched during refresh; dropping remaining results");
                    report.discarded += 1;
                    break;
                }
            }
        }

        if report != RefreshReport::default() {
            debug!("Refresh pass: {:?}", report);
        }
        report
    }

    async fn refresh_node(&self, node: &GraphNode, token: &InstallationToken) -> NodeRefresh {
        let (Some(kind), Some(id)) = (node.kind.entity_kind(), node.business_id) else {
            // Groups and unsaved nodes have nothing to fetch
            self.store.update_node(&node.id, |n| n.needs_refresh = false);
            return NodeRefresh::Applied;
        };

        match kind {
            EntityKind::Process => match self.emissions.get_process_emission(id).await {
                Ok(Some(_)) if !self.store.is_current(token) => NodeRefresh::Stale,
                Ok(Some(snapshot)) => {
                    self.projector.apply_emission_update(&node.id, snapshot);
                    NodeRefresh::Applied
                }
                Ok(None) => NodeRefresh::Deferred,
                Err(e) => {
                    warn!("Refresh of process {} failed: {}", id, e);
                    NodeRefresh::Failed
                }
            },
            EntityKind::Product => match self.emissions.get_product_emission(id).await {
                Ok(Some(_)) if !self.store.is_current(token) => NodeRefresh::Stale,
                Ok(Some(view)) => {
                    self.projector.apply_product_update(&node.id, &view);
                    NodeRefresh::Applied
                }
                Ok(None) => NodeRefresh::Deferred,
                Err(e) => {
                    warn!("Refresh of product {} failed: {}", id, e);
                    NodeRefresh::Failed
                }
            },
        }
    }
}

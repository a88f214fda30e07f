//! Event handling for GraphSync.
//!
//! Contains:
//! - Refresh-flag wiring (wire_refresh_flags): recalculation channels mark the
//!   affected nodes `needs_refresh`, the next refresh pass refetches them
//! - User notices (drain_notices): polled from the bus queue by the host

use std::sync::Arc;

use log::trace;

use super::GraphSync;
use crate::core::event_bus::{EventBus, Subscription, downcast_event};
use crate::core::graph_events::{
    EdgePropagationComplete, ProcessRecalculated, RefreshAllNodesAfterProductUpdate, RefreshProduct,
    UserNotice,
};
use crate::core::graph_store::GraphStore;
use crate::entities::EntityKind;

/// Subscribe the store to every recalculation channel.
/// The returned subscriptions must be kept alive by the owner.
pub(super) fn wire_refresh_flags(bus: &EventBus, store: &Arc<GraphStore>) -> Vec<Subscription> {
    let mut subscriptions = Vec::with_capacity(4);

    let s = Arc::clone(store);
    subscriptions.push(bus.subscribe::<EdgePropagationComplete, _>(move |e| {
        let (source_kind, target_kind) = e.edge_kind.endpoint_kinds();
        let mut flagged = 0;
        if let Some(kind) = source_kind.entity_kind() {
            flagged += s.mark_stale(kind, e.source_business_id);
        }
        if let Some(kind) = target_kind.entity_kind() {
            flagged += s.mark_stale(kind, e.target_business_id);
        }
        trace!(
            "{} edge {} -> {} propagated: {} node(s) flagged",
            e.edge_kind, e.source_business_id, e.target_business_id, flagged
        );
    }));

    let s = Arc::clone(store);
    subscriptions.push(bus.subscribe::<ProcessRecalculated, _>(move |e| {
        s.mark_stale(EntityKind::Process, e.0);
    }));

    let s = Arc::clone(store);
    subscriptions.push(bus.subscribe::<RefreshAllNodesAfterProductUpdate, _>(move |_| {
        s.mark_all_needs_refresh();
    }));

    let s = Arc::clone(store);
    subscriptions.push(bus.subscribe::<RefreshProduct, _>(move |e| {
        s.mark_stale(EntityKind::Product, e.0);
    }));

    subscriptions
}

impl GraphSync {
    /// Take the user notices published since the last call.
    ///
    /// Drains the bus queue; other queued events were already handled by
    /// their subscribers when emitted.
    pub fn drain_notices(&self) -> Vec<UserNotice> {
        self.bus
            .poll()
            .iter()
            .filter_map(|event| downcast_event::<UserNotice>(event).cloned())
            .collect()
    }
}

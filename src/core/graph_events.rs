//! Event channels published on the [`EventBus`](super::event_bus::EventBus).

use crate::entities::{BusinessId, EdgeKind};
use crate::error::ErrorCategory;

// === Recalculation ===

/// A confirmed edge has been propagated server-side; endpoints must refresh.
#[derive(Clone, Debug, PartialEq)]
pub struct EdgePropagationComplete {
    pub edge_kind: EdgeKind,
    pub source_business_id: BusinessId,
    pub target_business_id: BusinessId,
}

/// Scoped recalculation of a process finished.
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessRecalculated(pub BusinessId);

// === Product updates ===

/// A product change may have moved figures anywhere in the graph.
#[derive(Clone, Debug, PartialEq)]
pub struct RefreshAllNodesAfterProductUpdate;

/// Only this product's node must refresh.
#[derive(Clone, Debug, PartialEq)]
pub struct RefreshProduct(pub BusinessId);

// === User feedback ===

/// Message for the status bar / toast area.
#[derive(Clone, Debug, PartialEq)]
pub struct UserNotice {
    pub category: ErrorCategory,
    pub message: String,
}

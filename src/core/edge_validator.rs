//! Connection rules between node kinds.
//!
//! Rules are checked in order:
//! 1. self-loop → rejected
//! 2. product → product → rejected
//! 3. process → process = `continue`, process → product = `produce`,
//!    product → process = `consume`
//! 4. anything else (a `group` endpoint) → rejected
//!
//! Pure and total: every input yields a classification.

use crate::entities::{EdgeKind, NodeId, NodeKind};

/// Outcome of [`classify`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeClassification {
    pub valid: bool,
    pub kind: Option<EdgeKind>,
    pub reason: Option<&'static str>,
}

impl EdgeClassification {
    fn accept(kind: EdgeKind) -> Self {
        Self { valid: true, kind: Some(kind), reason: None }
    }

    fn reject(reason: &'static str) -> Self {
        Self { valid: false, kind: None, reason: Some(reason) }
    }
}

pub const REASON_SELF_LOOP: &str = "A node cannot be connected to itself.";
pub const REASON_PRODUCT_TO_PRODUCT: &str = "Products cannot be connected directly to other products.";
pub const REASON_UNSUPPORTED: &str = "Only processes and products can be connected.";

/// Classify a connection from `source` to `target`
pub fn classify(
    source_id: &NodeId,
    source_kind: NodeKind,
    target_id: &NodeId,
    target_kind: NodeKind,
) -> EdgeClassification {
    if source_id == target_id {
        return EdgeClassification::reject(REASON_SELF_LOOP);
    }
    classify_kinds(source_kind, target_kind)
}

/// Kind-only rules (no self-loop check)
pub fn classify_kinds(source: NodeKind, target: NodeKind) -> EdgeClassification {
    use NodeKind::*;
    match (source, target) {
        (Product, Product) => EdgeClassification::reject(REASON_PRODUCT_TO_PRODUCT),
        (Process, Process) => EdgeClassification::accept(EdgeKind::Continue),
        (Process, Product) => EdgeClassification::accept(EdgeKind::Produce),
        (Product, Process) => EdgeClassification::accept(EdgeKind::Consume),
        (Group, _) | (_, Group) => EdgeClassification::reject(REASON_UNSUPPORTED),
    }
}

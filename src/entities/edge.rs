//! Graph edge record with an explicit local/backend id pair.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{BackendEdgeId, NodeId, NodeKind};

/// Prefix of local ids of edges awaiting server acknowledgment
pub const PROVISIONAL_PREFIX: &str = "temp-";

/// Semantic role of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    /// process → process
    Continue,
    /// process → product
    Produce,
    /// product → process
    Consume,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Continue => "continue",
            EdgeKind::Produce => "produce",
            EdgeKind::Consume => "consume",
        }
    }

    /// (source kind, target kind) implied by the edge kind
    pub fn endpoint_kinds(&self) -> (NodeKind, NodeKind) {
        match self {
            EdgeKind::Continue => (NodeKind::Process, NodeKind::Process),
            EdgeKind::Produce => (NodeKind::Process, NodeKind::Product),
            EdgeKind::Consume => (NodeKind::Product, NodeKind::Process),
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stroke used to draw an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeStyle {
    Solid,
    /// Pending server acknowledgment
    Dashed,
}

/// Edge on the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    /// Local id: `temp-<uuid>` while provisional, `e-<backendId>` once confirmed
    pub id: String,
    #[serde(default)]
    pub backend_id: Option<BackendEdgeId>,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default)]
    pub source_handle: Option<String>,
    #[serde(default)]
    pub target_handle: Option<String>,
    /// Classified from the endpoint kinds before the edge is inserted
    pub kind: EdgeKind,
    pub confirmed: bool,
}

impl GraphEdge {
    /// Optimistic, unconfirmed edge
    pub fn provisional(
        source: NodeId,
        target: NodeId,
        kind: EdgeKind,
        source_handle: Option<&str>,
        target_handle: Option<&str>,
    ) -> Self {
        Self {
            id: format!("{}{}", PROVISIONAL_PREFIX, Uuid::new_v4()),
            backend_id: None,
            source,
            target,
            source_handle: source_handle.map(str::to_string),
            target_handle: target_handle.map(str::to_string),
            kind,
            confirmed: false,
        }
    }

    /// Confirmed copy carrying the server-issued id
    pub fn confirmed(&self, backend_id: BackendEdgeId) -> Self {
        Self {
            id: Self::confirmed_id(backend_id),
            backend_id: Some(backend_id),
            confirmed: true,
            ..self.clone()
        }
    }

    pub fn confirmed_id(backend_id: BackendEdgeId) -> String {
        format!("e-{}", backend_id)
    }

    pub fn is_provisional(&self) -> bool {
        !self.confirmed
    }

    pub fn style(&self) -> EdgeStyle {
        if self.confirmed { EdgeStyle::Solid } else { EdgeStyle::Dashed }
    }

    /// Same endpoints and handles (idempotence key for edge creation)
    pub fn connects(
        &self,
        source: &NodeId,
        target: &NodeId,
        source_handle: Option<&str>,
        target_handle: Option<&str>,
    ) -> bool {
        &self.source == source
            && &self.target == target
            && self.source_handle.as_deref() == source_handle
            && self.target_handle.as_deref() == target_handle
    }

    pub fn touches(&self, node: &NodeId) -> bool {
        &self.source == node || &self.target == node
    }
}

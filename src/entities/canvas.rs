//! Serializable canvas snapshot of one installation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{GraphEdge, GraphNode, InstallationId};

/// Plain-data copy of a canvas. Holds no handlers and no read-only flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasSnapshot {
    pub installation_id: InstallationId,
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
    pub saved_at: DateTime<Utc>,
}

impl CanvasSnapshot {
    pub fn empty(installation_id: InstallationId) -> Self {
        Self {
            installation_id,
            nodes: Vec::new(),
            edges: Vec::new(),
            saved_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

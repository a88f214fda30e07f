//! Graph node record: plain data plus runtime-only interaction handlers.
//!
//! Handlers are never serialized. After a snapshot is loaded they are rebuilt by
//! `NodeProjector` (see `core::node_projector`), keyed by node kind.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{BusinessId, EntityKind, InstallationId, NodeId, ProductQuantities};

/// Kind of node on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Process,
    Product,
    /// Visual grouping frame; never an edge endpoint
    Group,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Process => "process",
            NodeKind::Product => "product",
            NodeKind::Group => "group",
        }
    }

    /// Entity kind used for emission reads (groups have none)
    pub fn entity_kind(&self) -> Option<EntityKind> {
        match self {
            NodeKind::Process => Some(EntityKind::Process),
            NodeKind::Product => Some(EntityKind::Product),
            NodeKind::Group => None,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Last known emission figures of a node. All numbers default to 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmissionSnapshot {
    pub attributed_emission: f64,
    pub cumulative_emission: f64,
    pub total_material_direct_emission: f64,
    pub total_fuel_direct_emission: f64,
    pub computed_at: Option<DateTime<Utc>>,
}

impl EmissionSnapshot {
    /// Snapshot carrying only an attributed figure (cumulative mirrors it)
    pub fn attributed(value: f64) -> Self {
        Self {
            attributed_emission: value,
            cumulative_emission: value,
            ..Self::default()
        }
    }

    /// Sum of the material and fuel direct components
    pub fn direct_total(&self) -> f64 {
        self.total_material_direct_emission + self.total_fuel_direct_emission
    }
}

/// Display fields shown on a node card.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeDisplay {
    pub label: String,
    pub subtitle: Option<String>,
    /// Names of products attached to a process node
    pub related_products: Vec<String>,
    /// Quantities of a product node
    pub quantities: Option<ProductQuantities>,
    /// Product node: some process produces it
    pub has_produce_edge: bool,
}

/// Callback invoked with the id of the node the user interacted with
pub type NodeCallback = Arc<dyn Fn(&NodeId) + Send + Sync>;

/// Runtime-only interaction handlers
#[derive(Clone, Default)]
pub struct NodeHandlers {
    pub on_click: Option<NodeCallback>,
    pub on_double_click: Option<NodeCallback>,
}

impl NodeHandlers {
    pub fn is_bound(&self) -> bool {
        self.on_click.is_some() || self.on_double_click.is_some()
    }
}

impl fmt::Debug for NodeHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHandlers")
            .field("on_click", &self.on_click.is_some())
            .field("on_double_click", &self.on_double_click.is_some())
            .finish()
    }
}

/// Node on the canvas.
///
/// There is no stored read-only flag: it is derived from `owner_installation_id`
/// and the active installation each time it is read (see [`GraphNode::is_read_only`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Server id of the underlying entity; absent until persisted
    #[serde(default)]
    pub business_id: Option<BusinessId>,
    pub owner_installation_id: InstallationId,
    #[serde(default)]
    pub position: [f32; 2],
    #[serde(default)]
    pub display: NodeDisplay,
    #[serde(default, rename = "emissionSnapshot")]
    pub emission: EmissionSnapshot,
    #[serde(default)]
    pub needs_refresh: bool,
    #[serde(skip)]
    pub handlers: NodeHandlers,
}

impl GraphNode {
    pub fn new(kind: NodeKind, business_id: Option<BusinessId>, owner: InstallationId) -> Self {
        Self {
            id: NodeId::generate(kind),
            kind,
            business_id,
            owner_installation_id: owner,
            position: [0.0, 0.0],
            display: NodeDisplay::default(),
            emission: EmissionSnapshot::default(),
            needs_refresh: false,
            handlers: NodeHandlers::default(),
        }
    }

    /// Builder: explicit local id (rehydration, tests)
    pub fn with_id(mut self, id: impl Into<NodeId>) -> Self {
        self.id = id.into();
        self
    }

    /// Builder: display label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.display.label = label.into();
        self
    }

    /// True when the node belongs to an installation other than the active one.
    /// With no active installation every node is foreign.
    pub fn is_read_only(&self, active: Option<InstallationId>) -> bool {
        active != Some(self.owner_installation_id)
    }

    /// Does this node render `(kind, id)`?
    pub fn represents(&self, kind: EntityKind, id: BusinessId) -> bool {
        self.kind.entity_kind() == Some(kind) && self.business_id == Some(id)
    }
}

/// Render record: node plus the derived read-only flag.
#[derive(Debug, Clone)]
pub struct NodeView {
    pub node: GraphNode,
    pub read_only: bool,
}

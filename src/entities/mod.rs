//! Entities module - plain graph and domain types
//!
//! Nodes and edges are what the canvas renders; domain types are what the
//! CRUD screens hand over. None of these types talk to the network.

pub mod canvas;
pub mod domain;
pub mod edge;
pub mod ids;
pub mod node;

pub use canvas::CanvasSnapshot;
pub use domain::{DomainProcess, DomainProduct, EmissionSource, ProductEmissionView, ProductQuantities};
pub use edge::{EdgeKind, EdgeStyle, GraphEdge, PROVISIONAL_PREFIX};
pub use ids::{BackendEdgeId, BusinessId, EntityKind, InstallationId, NodeId};
pub use node::{EmissionSnapshot, GraphNode, NodeCallback, NodeDisplay, NodeHandlers, NodeKind, NodeView};

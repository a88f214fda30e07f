//! EMIGRAPH - client-side emission graph synchronization library
//!
//! Re-exports all modules for use by the binary target and host applications.

// Core engine (store, cache, coordinators, events, persistence)
pub mod core;

// App modules
pub mod app;
pub mod cli;
pub mod entities;
pub mod error;
pub mod paths;
pub mod remote;
pub mod settings;

// Re-export commonly used types
pub use app::{GraphSync, RefreshReport};
pub use core::event_bus::{BoxedEvent, EventBus, Subscription, downcast_event};
pub use core::graph_events::{
    EdgePropagationComplete, ProcessRecalculated, RefreshAllNodesAfterProductUpdate, RefreshProduct,
    UserNotice,
};
pub use core::{CreateEdgeOutcome, DeleteReport, FileSnapshotStore, MemorySnapshotStore, SnapshotStore};
pub use error::{EngineError, ErrorCategory};
pub use remote::{ApiError, EmissionApi, HttpEmissionApi};
pub use settings::EngineSettings;

// Re-export entities
pub use entities::{
    BusinessId, DomainProcess, DomainProduct, EdgeKind, EmissionSnapshot, GraphEdge, GraphNode,
    InstallationId, NodeId, NodeKind, NodeView, ProductEmissionView,
};

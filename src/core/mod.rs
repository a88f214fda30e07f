//! Core engine modules - store, cache, coordinators, events, persistence
//!
//! These modules form the synchronization engine, independent of any UI.

pub mod canvas_persistence;
pub mod debounced_saver;
pub mod edge_coordinator;
pub mod edge_validator;
pub mod emission_cache;
pub mod emission_coordinator;
pub mod event_bus;
pub mod graph_events;
pub mod graph_store;
pub mod node_projector;

// Re-exports for convenience
pub use canvas_persistence::{CanvasPersistence, FileSnapshotStore, MemorySnapshotStore, SnapshotStore};
pub use debounced_saver::DebouncedSaver;
pub use edge_coordinator::{CreateEdgeOutcome, DeleteReport, EdgeCoordinator};
pub use edge_validator::{EdgeClassification, classify, classify_kinds};
pub use emission_cache::{CacheStats, EmissionCache};
pub use emission_coordinator::EmissionCoordinator;
pub use event_bus::{EventBus, Subscription};
pub use graph_store::{GraphChange, GraphStore, InstallationToken};
pub use node_projector::{HandlerFactory, NodeProjector};

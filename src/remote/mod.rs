//! Remote calculation service boundary.
//!
//! # Purpose
//!
//! The engine never computes emissions itself. Every figure comes from the
//! calculation service through the [`EmissionApi`] trait, which is the single
//! seam between the engine and the network.
//!
//! # Endpoints
//!
//! | Method | Path                                    | Trait method             |
//! |--------|-----------------------------------------|--------------------------|
//! | POST   | `/edges`                                | `create_edge`            |
//! | DELETE | `/edges/{id}`                           | `delete_edge`            |
//! | GET    | `/processes/{id}/emission`              | `process_emission`       |
//! | GET    | `/processes/{id}/material-total`        | `material_total`         |
//! | GET    | `/processes/{id}/fuel-total`            | `fuel_total`             |
//! | POST   | `/processes/{id}/recompute-attributed`  | `recompute_attributed`   |
//! | GET    | `/products/{id}/preview-emission`       | `product_preview`        |
//! | GET    | `/products/{id}`                        | `product_record`         |
//! | POST   | `/graph/recalculate`                    | `recalculate_graph`      |
//! | POST   | `/processes/{id}/recalculate`           | `recalculate_process`    |
//!
//! # Used by
//!
//! - `core::edge_coordinator` - edge create/delete
//! - `core::emission_coordinator` - reads, repairs, recalculations

mod api;
#[cfg(test)]
pub(crate) mod testing;

pub use api::HttpEmissionApi;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::{BackendEdgeId, BusinessId, EdgeKind, NodeKind, ProductQuantities};

/// Failure of a single remote call
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    /// 404: the resource (or its emission) does not exist yet
    #[error("resource not found")]
    NotFound,
    /// Any other 4xx: the server refused the request
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    /// 5xx
    #[error("server error ({status})")]
    Server { status: u16 },
    /// Connection, timeout or transport failure
    #[error("network error: {0}")]
    Network(String),
    /// Response body did not match the expected shape
    #[error("malformed response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound)
    }
}

/// Body of `POST /edges`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEdgeRequest {
    pub source_kind: NodeKind,
    pub source_id: BusinessId,
    pub target_kind: NodeKind,
    pub target_id: BusinessId,
    pub edge_kind: EdgeKind,
}

/// Response of `POST /edges`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CreatedEdge {
    pub id: BackendEdgeId,
}

/// Response of `GET /processes/{id}/emission`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessEmissionRecord {
    pub attributed_emission: f64,
    pub cumulative_emission: Option<f64>,
    pub total_material_direct_emission: Option<f64>,
    pub total_fuel_direct_emission: Option<f64>,
    pub computed_at: Option<DateTime<Utc>>,
}

/// Response of the material/fuel total endpoints
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DirectTotal {
    pub total: f64,
}

/// Response of `GET /products/{id}/preview-emission`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProductPreview {
    pub attributed_emission: f64,
    pub has_produce_edge: bool,
}

/// Response of `GET /products/{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
    pub id: BusinessId,
    #[serde(default)]
    pub attributed_emission: Option<f64>,
    #[serde(default)]
    pub has_produce_edge: Option<bool>,
    #[serde(flatten)]
    pub quantities: ProductQuantities,
}

/// Body of `POST /graph/recalculate`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecalculateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_edge_id: Option<BackendEdgeId>,
    pub include_validation: bool,
}

/// Calculation service operations used by the engine.
///
/// Implementations must be cheap to share (`Arc<dyn EmissionApi>`) and must not
/// retry on their own: retry policy belongs to the coordinators.
#[async_trait]
pub trait EmissionApi: Send + Sync {
    async fn create_edge(&self, request: &CreateEdgeRequest) -> Result<CreatedEdge, ApiError>;
    async fn delete_edge(&self, id: BackendEdgeId) -> Result<(), ApiError>;
    async fn process_emission(&self, id: BusinessId) -> Result<ProcessEmissionRecord, ApiError>;
    async fn material_total(&self, id: BusinessId) -> Result<f64, ApiError>;
    async fn fuel_total(&self, id: BusinessId) -> Result<f64, ApiError>;
    async fn recompute_attributed(&self, id: BusinessId) -> Result<(), ApiError>;
    async fn product_preview(&self, id: BusinessId) -> Result<ProductPreview, ApiError>;
    async fn product_record(&self, id: BusinessId) -> Result<ProductRecord, ApiError>;
    async fn recalculate_graph(&self, request: &RecalculateRequest) -> Result<(), ApiError>;
    async fn recalculate_process(&self, id: BusinessId) -> Result<(), ApiError>;
}

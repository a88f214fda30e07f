//! Domain entities as delivered by the CRUD screens, and merged emission views.

use serde::{Deserialize, Serialize};

use super::{BusinessId, InstallationId};

/// Process as known to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainProcess {
    pub id: BusinessId,
    pub name: String,
    pub installation_id: InstallationId,
}

/// Product as known to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainProduct {
    pub id: BusinessId,
    pub name: String,
    pub installation_id: InstallationId,
    #[serde(default)]
    pub hs_code: Option<String>,
}

/// Quantity fields of a product record, independent of emission computation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProductQuantities {
    pub produced_quantity: f64,
    pub sold_quantity: f64,
    pub eu_sold_quantity: f64,
}

/// Where a product's attributed emission came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmissionSource {
    /// Live preview computation (authoritative)
    Preview,
    /// Stored value of the persisted product record (degraded)
    StoredRecord,
}

/// Merged product reading. Never cached.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductEmissionView {
    pub product_id: BusinessId,
    pub attributed_emission: f64,
    pub has_produce_edge: bool,
    pub source: EmissionSource,
    /// None when the product record could not be fetched
    pub quantities: Option<ProductQuantities>,
}

//! HTTP implementation of [`EmissionApi`] using reqwest.
//!
//! # Status mapping
//!
//! - 2xx → Ok
//! - 404 → [`ApiError::NotFound`]
//! - other 4xx → [`ApiError::Rejected`] (body text becomes the message)
//! - 5xx → [`ApiError::Server`]
//! - transport failure / timeout → [`ApiError::Network`]
//! - unexpected body → [`ApiError::Decode`]

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, trace};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::{
    ApiError, CreateEdgeRequest, CreatedEdge, DirectTotal, EmissionApi, ProcessEmissionRecord,
    ProductPreview, ProductRecord, RecalculateRequest,
};
use crate::entities::{BackendEdgeId, BusinessId};
use crate::settings::EngineSettings;

/// Material/fuel totals arrive either wrapped (`{"total": 1.5}`) or bare (`1.5`)
#[derive(Deserialize)]
#[serde(untagged)]
enum TotalBody {
    Wrapped(DirectTotal),
    Bare(f64),
}

impl TotalBody {
    fn value(self) -> f64 {
        match self {
            TotalBody::Wrapped(t) => t.total,
            TotalBody::Bare(v) => v,
        }
    }
}

/// Calculation service client
#[derive(Debug, Clone)]
pub struct HttpEmissionApi {
    client: Client,
    base_url: String,
}

impl HttpEmissionApi {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn from_settings(settings: &EngineSettings) -> Result<Self, ApiError> {
        Self::new(
            settings.api_base_url.clone(),
            Duration::from_millis(settings.request_timeout_ms),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        let status = response.status();
        trace!("{} {}", status.as_u16(), response.url());
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status.as_u16(), body))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        self.send(request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn send_empty(&self, request: RequestBuilder) -> Result<(), ApiError> {
        self.send(request).await.map(|_| ())
    }
}

/// Map a non-success status code to an [`ApiError`]
pub(crate) fn classify_status(status: u16, body: String) -> ApiError {
    match status {
        404 => ApiError::NotFound,
        400..=499 => {
            let message = if body.trim().is_empty() {
                format!("HTTP {}", status)
            } else {
                body.trim().to_string()
            };
            ApiError::Rejected { status, message }
        }
        500..=599 => {
            debug!("server error {}: {}", status, body);
            ApiError::Server { status }
        }
        other => ApiError::Network(format!("unexpected status {}", other)),
    }
}

#[async_trait]
impl EmissionApi for HttpEmissionApi {
    async fn create_edge(&self, request: &CreateEdgeRequest) -> Result<CreatedEdge, ApiError> {
        self.send_json(self.client.post(self.url("/edges")).json(request)).await
    }

    async fn delete_edge(&self, id: BackendEdgeId) -> Result<(), ApiError> {
        self.send_empty(self.client.delete(self.url(&format!("/edges/{}", id))))
            .await
    }

    async fn process_emission(&self, id: BusinessId) -> Result<ProcessEmissionRecord, ApiError> {
        self.send_json(self.client.get(self.url(&format!("/processes/{}/emission", id))))
            .await
    }

    async fn material_total(&self, id: BusinessId) -> Result<f64, ApiError> {
        let body: TotalBody = self
            .send_json(self.client.get(self.url(&format!("/processes/{}/material-total", id))))
            .await?;
        Ok(body.value())
    }

    async fn fuel_total(&self, id: BusinessId) -> Result<f64, ApiError> {
        let body: TotalBody = self
            .send_json(self.client.get(self.url(&format!("/processes/{}/fuel-total", id))))
            .await?;
        Ok(body.value())
    }

    async fn recompute_attributed(&self, id: BusinessId) -> Result<(), ApiError> {
        self.send_empty(
            self.client
                .post(self.url(&format!("/processes/{}/recompute-attributed", id))),
        )
        .await
    }

    async fn product_preview(&self, id: BusinessId) -> Result<ProductPreview, ApiError> {
        self.send_json(
            self.client
                .get(self.url(&format!("/products/{}/preview-emission", id))),
        )
        .await
    }

    async fn product_record(&self, id: BusinessId) -> Result<ProductRecord, ApiError> {
        self.send_json(self.client.get(self.url(&format!("/products/{}", id))))
            .await
    }

    async fn recalculate_graph(&self, request: &RecalculateRequest) -> Result<(), ApiError> {
        self.send_empty(self.client.post(self.url("/graph/recalculate")).json(request))
            .await
    }

    async fn recalculate_process(&self, id: BusinessId) -> Result<(), ApiError> {
        self.send_empty(
            self.client
                .post(self.url(&format!("/processes/{}/recalculate", id))),
        )
        .await
    }
}

//! Engine error taxonomy.
//!
//! Coordinators classify remote failures locally. Only `Validation` and
//! terminal `Transient` failures reach the user (as a [`UserNotice`]); not-found
//! and drift are repaired silently and never surface as errors.
//!
//! [`UserNotice`]: crate::core::graph_events::UserNotice

use crate::entities::{BusinessId, EntityKind, InstallationId, NodeId};
use crate::remote::ApiError;

/// User-facing category of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Illegal edge or request refused by the server; no retry
    Validation,
    /// Emission not materialized yet; repaired by aggregation
    NotFound,
    /// Network or 5xx; retry later
    Transient,
    /// Local bookkeeping failure (persistence, unresolved nodes)
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid connection: {0}")]
    Validation(String),

    #[error("node {0} cannot be used as an edge endpoint")]
    UnresolvedEndpoint(NodeId),

    #[error("emission of {kind} {id} is not materialized")]
    NotFound { kind: EntityKind, id: BusinessId },

    #[error("calculation service unavailable: {0}")]
    Transient(#[source] ApiError),

    #[error("response for installation {0:?} arrived after the canvas changed")]
    Stale(Option<InstallationId>),

    #[error("canvas persistence failed: {0:#}")]
    Persistence(#[from] anyhow::Error),
}

impl EngineError {
    /// Classify a remote failure that is not a not-found.
    pub fn from_api(err: ApiError) -> Self {
        match err {
            ApiError::Rejected { message, .. } => EngineError::Validation(message),
            other => EngineError::Transient(other),
        }
    }

    /// Classify a remote failure for an emission read of `(kind, id)`.
    pub fn from_read(err: ApiError, kind: EntityKind, id: BusinessId) -> Self {
        if err.is_not_found() {
            EngineError::NotFound { kind, id }
        } else {
            Self::from_api(err)
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineError::Validation(_) => ErrorCategory::Validation,
            EngineError::NotFound { .. } => ErrorCategory::NotFound,
            EngineError::Transient(_) => ErrorCategory::Transient,
            EngineError::UnresolvedEndpoint(_)
            | EngineError::Stale(_)
            | EngineError::Persistence(_) => ErrorCategory::Internal,
        }
    }

    /// Message shown to the user, or None when the failure stays silent
    pub fn user_message(&self) -> Option<String> {
        match self {
            EngineError::Validation(reason) => Some(reason.clone()),
            EngineError::Transient(_) => Some(
                "The calculation service is unavailable right now. Please try again later."
                    .to_string(),
            ),
            EngineError::UnresolvedEndpoint(_) => {
                Some("Save both nodes before connecting them.".to_string())
            }
            EngineError::NotFound { .. } | EngineError::Stale(_) | EngineError::Persistence(_) => {
                None
            }
        }
    }
}

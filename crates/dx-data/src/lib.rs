//! Data adapter between tabular resources and the visualization layer
//!
//! The [`AdapterFacade`] is the only entry point: it opens exploration
//! sessions on resources and answers paging requests with
//! [`ExplorerPayload`]s. Everything else in this crate is a building block
//! of those two operations.

pub mod catalog;
pub mod config;
pub mod facade;
pub mod sampling;
pub mod schema;
pub mod session;
pub mod sources;
pub mod view_state;
pub mod windower;

use dx_core::StoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Re-exports
pub use catalog::ResourceCatalog;
pub use config::{AdapterConfig, NullConfig, RetryConfig};
pub use facade::AdapterFacade;
pub use sources::{CsvStore, MemoryStore, SqliteStore};
pub use view_state::{ExplorerPayload, UiRequest, WireColumn};

/// Errors surfaced at the adapter boundary
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("resource '{0}' has no rows")]
    EmptyResource(String),

    #[error("store unavailable after {attempts} attempts: {message}")]
    StoreUnavailable { attempts: u32, message: String },

    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("unknown resource '{0}'")]
    UnknownResource(String),

    #[error("resource '{0}' cannot be explored")]
    NotExplorable(String),

    #[error("request superseded by generation {generation}")]
    Superseded { generation: u64 },

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<StoreError> for AdapterError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(id) => AdapterError::UnknownResource(id),
            other => AdapterError::Store(other),
        }
    }
}

/// Stable error category the Host Portal renders a message for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    EmptyResource,
    StoreUnavailable,
    InvalidCursor,
    UnknownField,
    UnknownResource,
    NotExplorable,
    Superseded,
    Internal,
}

/// Error body returned to the Host Portal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub kind: ErrorKind,
    pub message: String,
    pub retry_suggested: bool,
}

impl AdapterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AdapterError::EmptyResource(_) => ErrorKind::EmptyResource,
            AdapterError::StoreUnavailable { .. } => ErrorKind::StoreUnavailable,
            AdapterError::InvalidCursor(_) => ErrorKind::InvalidCursor,
            AdapterError::UnknownField(_) => ErrorKind::UnknownField,
            AdapterError::UnknownResource(_) => ErrorKind::UnknownResource,
            AdapterError::NotExplorable(_) => ErrorKind::NotExplorable,
            AdapterError::Superseded { .. } => ErrorKind::Superseded,
            AdapterError::Store(_)
            | AdapterError::Config(_)
            | AdapterError::Io(_)
            | AdapterError::Json(_) => ErrorKind::Internal,
        }
    }

    /// Whether the caller may usefully retry the same request
    pub fn is_retriable(&self) -> bool {
        matches!(self, AdapterError::StoreUnavailable { .. })
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            success: false,
            kind: self.kind(),
            message: self.to_string(),
            retry_suggested: self.is_retriable(),
        }
    }
}

pub type Result<T, E = AdapterError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response() {
        let err = AdapterError::StoreUnavailable {
            attempts: 3,
            message: "connection refused".into(),
        };
        let response = err.to_response();
        assert!(!response.success);
        assert_eq!(response.kind, ErrorKind::StoreUnavailable);
        assert!(response.retry_suggested);

        let json = serde_json::to_value(&AdapterError::UnknownField("x".into()).to_response()).unwrap();
        assert_eq!(json["kind"], "unknown_field");
        assert_eq!(json["retrySuggested"], false);
    }

    #[test]
    fn test_not_found_maps_to_unknown_resource() {
        let err: AdapterError = StoreError::NotFound("abc".into()).into();
        assert_eq!(err.kind(), ErrorKind::UnknownResource);
    }
}

//! Backing-store abstraction and the Host Portal resource lookup

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::query::{FilterClause, Pushdown, SortKey};
use crate::schema::ColumnMetadata;
use crate::window::Record;

/// Errors reported by a backing store
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Connectivity or locking problem that may go away on retry
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected or failed the query
    #[error("query failed: {0}")]
    Query(String),

    /// The resource does not exist in the store
    #[error("not found: {0}")]
    NotFound(String),
}

impl StoreError {
    /// Only connectivity failures are worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Abstract tabular query interface every concrete store implements.
///
/// Stores that report `false` for a pushdown capability may ignore the
/// corresponding argument; callers then evaluate it themselves.
#[async_trait]
pub trait TabularStore: Send + Sync {
    /// Human-readable name for logs
    fn name(&self) -> &str;

    /// Which clauses the store evaluates itself
    fn capabilities(&self) -> Pushdown;

    /// Unfiltered row count, if it can be obtained cheaply
    async fn count(&self) -> Result<Option<usize>, StoreError>;

    /// Row count under a filter, if the store can answer it cheaply
    async fn count_filtered(&self, _filter: &[FilterClause]) -> Result<Option<usize>, StoreError> {
        Ok(None)
    }

    /// Fetch at most `limit` rows starting at `offset`
    async fn fetch_window(
        &self,
        offset: usize,
        limit: usize,
        filter: &[FilterClause],
        sort: &[SortKey],
    ) -> Result<Vec<Record>, StoreError>;

    /// Explicit column types and labels, when the store has them
    async fn column_metadata(&self) -> Result<Vec<ColumnMetadata>, StoreError> {
        Ok(Vec::new())
    }

    /// Version tag (etag, mtime, ...) that changes when the data changes
    async fn version(&self) -> Result<Option<String>, StoreError> {
        Ok(None)
    }
}

/// What the Host Portal knows about a resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub id: String,
    pub format: Option<String>,
    pub url: Option<String>,
    pub datastore_active: bool,
}

/// Formats the explorer can open without a datastore table
const EXPLORABLE_FORMATS: &[&str] = &["csv", "xls", "xlsx", "tsv"];

impl ResourceDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_datastore(mut self, active: bool) -> Self {
        self.datastore_active = active;
        self
    }

    /// Whether the explorer view applies to this resource
    pub fn is_explorable(&self) -> bool {
        if self.datastore_active {
            return true;
        }
        if self
            .url
            .as_deref()
            .map_or(false, |url| url.contains("_datastore_only_resource"))
        {
            return true;
        }
        self.format.as_deref().map_or(false, |format| {
            EXPLORABLE_FORMATS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(format))
        })
    }
}

/// A resource handle valid for the duration of one request
#[derive(Clone)]
pub struct ResolvedResource {
    pub descriptor: ResourceDescriptor,
    pub store: Arc<dyn TabularStore>,
}

/// Host Portal lookup from resource id to store
#[async_trait]
pub trait ResourceResolver: Send + Sync {
    async fn resolve(&self, resource_id: &str) -> Result<ResolvedResource, StoreError>;
}

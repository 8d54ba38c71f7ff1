//! In-memory table store

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dx_core::query::{compare_records, matches_all};
use dx_core::{ColumnMetadata, FilterClause, Pushdown, Record, SortKey, StoreError, TabularStore};
use parking_lot::RwLock;

/// Call counters, shared across clones of the store
#[derive(Debug, Default)]
pub struct FetchStats {
    calls: AtomicUsize,
    rows_served: AtomicUsize,
    max_limit: AtomicUsize,
}

impl FetchStats {
    fn record(&self, limit: usize, served: usize) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.rows_served.fetch_add(served, Ordering::Relaxed);
        self.max_limit.fetch_max(limit, Ordering::Relaxed);
    }

    /// Number of `fetch_window` calls
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    /// Rows returned across all calls
    pub fn rows_served(&self) -> usize {
        self.rows_served.load(Ordering::Relaxed)
    }

    /// Largest `limit` any call asked for
    pub fn max_limit(&self) -> usize {
        self.max_limit.load(Ordering::Relaxed)
    }
}

/// Table held in memory, with configurable capabilities
pub struct MemoryStore {
    name: String,
    rows: RwLock<Vec<Record>>,
    version: RwLock<Option<String>>,
    pushdown: Pushdown,
    count_known: bool,
    metadata: Vec<ColumnMetadata>,
    stats: Arc<FetchStats>,
}

impl MemoryStore {
    /// Create a store without pushdown that reports its row count
    pub fn new(name: impl Into<String>, rows: Vec<Record>) -> Self {
        Self {
            name: name.into(),
            rows: RwLock::new(rows),
            version: RwLock::new(None),
            pushdown: Pushdown::NONE,
            count_known: true,
            metadata: Vec::new(),
            stats: Arc::new(FetchStats::default()),
        }
    }

    pub fn with_pushdown(mut self, pushdown: Pushdown) -> Self {
        self.pushdown = pushdown;
        self
    }

    /// Behave like a streamed source that cannot count cheaply
    pub fn with_unknown_count(mut self) -> Self {
        self.count_known = false;
        self
    }

    pub fn with_metadata(mut self, metadata: Vec<ColumnMetadata>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_version(self, version: impl Into<String>) -> Self {
        *self.version.write() = Some(version.into());
        self
    }

    /// Swap the table contents, as an upstream reload would
    pub fn replace_rows(&self, rows: Vec<Record>, version: impl Into<String>) {
        *self.rows.write() = rows;
        *self.version.write() = Some(version.into());
    }

    pub fn stats(&self) -> Arc<FetchStats> {
        self.stats.clone()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

#[async_trait]
impl TabularStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Pushdown {
        self.pushdown
    }

    async fn count(&self) -> Result<Option<usize>, StoreError> {
        Ok(self.count_known.then(|| self.rows.read().len()))
    }

    async fn count_filtered(&self, filter: &[FilterClause]) -> Result<Option<usize>, StoreError> {
        if !(self.count_known && self.pushdown.filter) {
            return Ok(None);
        }
        let rows = self.rows.read();
        Ok(Some(rows.iter().filter(|r| matches_all(filter, r)).count()))
    }

    async fn fetch_window(
        &self,
        offset: usize,
        limit: usize,
        filter: &[FilterClause],
        sort: &[SortKey],
    ) -> Result<Vec<Record>, StoreError> {
        let rows = self.rows.read();
        let filter = if self.pushdown.filter { filter } else { &[] };

        let window: Vec<Record> = if self.pushdown.sort && !sort.is_empty() {
            let mut matching: Vec<&Record> = rows.iter().filter(|r| matches_all(filter, r)).collect();
            matching.sort_by(|a, b| compare_records(sort, a, b));
            matching.into_iter().skip(offset).take(limit).cloned().collect()
        } else {
            rows.iter()
                .filter(|r| matches_all(filter, r))
                .skip(offset)
                .take(limit)
                .cloned()
                .collect()
        };

        self.stats.record(limit, window.len());
        Ok(window)
    }

    async fn column_metadata(&self) -> Result<Vec<ColumnMetadata>, StoreError> {
        Ok(self.metadata.clone())
    }

    async fn version(&self) -> Result<Option<String>, StoreError> {
        Ok(self.version.read().clone())
    }
}

//! Bounded, retrying window reads against a backing store
//!
//! Every call into the store asks for at most `batch_limit` rows; larger
//! windows are assembled from repeated calls. When the store cannot evaluate
//! the requested filter or sort, the windower scans in bounded chunks and
//! evaluates them itself. A local sort buffers at most
//! `offset + limit + 2 * batch_limit` rows, so deep offsets cost memory.

use std::future::Future;
use std::sync::Arc;

use dx_core::events::events::{DegradedScan, FetchRetried};
use dx_core::query::{compare_records, matches_all};
use dx_core::{
    ColumnMetadata, EventBus, FilterClause, Record, RowWindow, SortKey, StoreError, TabularStore,
};
use tracing::{debug, warn};

use crate::config::{AdapterConfig, RetryConfig};
use crate::AdapterError;

/// A store query: which rows, filtered and sorted how
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowRequest {
    pub offset: usize,
    pub limit: usize,
    pub filter: Vec<FilterClause>,
    pub sort: Vec<SortKey>,
}

impl WindowRequest {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit,
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, filter: Vec<FilterClause>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_sort(mut self, sort: Vec<SortKey>) -> Self {
        self.sort = sort;
        self
    }
}

/// Rows gathered by one fetch, before projection
struct Scan {
    rows: Vec<Record>,
    /// The store ran out of rows while reading
    exhausted: bool,
    /// Total number of matching rows, known only after a full degraded scan
    matched: Option<usize>,
}

/// Fetches bounded windows of rows on demand
pub struct RowWindower {
    batch_limit: usize,
    retry: RetryConfig,
    excluded_columns: Vec<String>,
    events: Option<Arc<EventBus>>,
}

impl RowWindower {
    /// Create a windower issuing at most `batch_limit` rows per store call
    pub fn new(batch_limit: usize) -> Self {
        Self {
            batch_limit: batch_limit.max(1),
            retry: RetryConfig::default(),
            excluded_columns: Vec::new(),
            events: None,
        }
    }

    pub fn from_config(config: &AdapterConfig) -> Self {
        Self {
            batch_limit: config.store_batch_limit.max(1),
            retry: config.retry.clone(),
            excluded_columns: config.excluded_columns.clone(),
            events: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn batch_limit(&self) -> usize {
        self.batch_limit
    }

    /// Fetch a window of at most `request.limit` rows
    pub async fn fetch(
        &self,
        store: &dyn TabularStore,
        request: &WindowRequest,
    ) -> Result<RowWindow, AdapterError> {
        let total = self.count(store).await?;
        if request.limit == 0 {
            return Ok(RowWindow::empty(request.offset, total));
        }

        let caps = store.capabilities();
        let local_filter = !request.filter.is_empty() && !caps.filter;
        let local_sort = !request.sort.is_empty() && !caps.sort;

        let scan = if local_filter || local_sort {
            self.fetch_degraded(store, request, local_filter, local_sort).await?
        } else {
            self.fetch_pushed(store, request).await?
        };

        let filtered_count = if request.filter.is_empty() {
            total
        } else if caps.filter {
            self.call(store, || store.count_filtered(&request.filter)).await?
        } else {
            scan.matched
        };

        let rows = self.project(scan.rows);
        let next_offset = request.offset + rows.len();
        let has_more = match filtered_count {
            Some(count) => next_offset < count,
            None => !scan.exhausted && rows.len() == request.limit,
        };

        debug!(
            "Fetched {} rows at offset {} from '{}'",
            rows.len(),
            request.offset,
            store.name()
        );

        Ok(RowWindow {
            rows,
            offset: request.offset,
            total_known: total.is_some(),
            total_count: total,
            filtered_count,
            has_more,
        })
    }

    /// Read one bounded, unfiltered batch in store order
    pub async fn read_batch(
        &self,
        store: &dyn TabularStore,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Record>, AdapterError> {
        let limit = limit.min(self.batch_limit);
        let mut rows = self
            .call(store, || store.fetch_window(offset, limit, &[], &[]))
            .await?;
        rows.truncate(limit);
        Ok(self.project(rows))
    }

    /// Unfiltered row count, retried like any other store call
    pub async fn count(&self, store: &dyn TabularStore) -> Result<Option<usize>, AdapterError> {
        self.call(store, || store.count()).await
    }

    pub async fn version(&self, store: &dyn TabularStore) -> Result<Option<String>, AdapterError> {
        self.call(store, || store.version()).await
    }

    pub async fn column_metadata(
        &self,
        store: &dyn TabularStore,
    ) -> Result<Vec<ColumnMetadata>, AdapterError> {
        self.call(store, || store.column_metadata()).await
    }

    /// The store evaluates everything: read chunks until the window is full
    async fn fetch_pushed(
        &self,
        store: &dyn TabularStore,
        request: &WindowRequest,
    ) -> Result<Scan, AdapterError> {
        let mut rows: Vec<Record> = Vec::with_capacity(request.limit.min(self.batch_limit));
        let mut exhausted = false;

        while rows.len() < request.limit {
            let at = request.offset + rows.len();
            let want = (request.limit - rows.len()).min(self.batch_limit);
            let chunk = self
                .call(store, || {
                    store.fetch_window(at, want, &request.filter, &request.sort)
                })
                .await?;

            let got = chunk.len();
            rows.extend(chunk.into_iter().take(want));
            if got < want {
                exhausted = true;
                break;
            }
        }

        Ok(Scan {
            rows,
            exhausted,
            matched: None,
        })
    }

    /// Scan the store in bounded chunks, evaluating what it cannot
    async fn fetch_degraded(
        &self,
        store: &dyn TabularStore,
        request: &WindowRequest,
        local_filter: bool,
        local_sort: bool,
    ) -> Result<Scan, AdapterError> {
        let keep = request.offset.saturating_add(request.limit);
        let buffer_bound = keep.saturating_add(self.batch_limit.saturating_mul(2));
        if local_sort {
            warn!(
                "Store '{}' cannot evaluate {}sort; scanning the whole store and buffering up to {} rows",
                store.name(),
                if local_filter { "filter and " } else { "" },
                buffer_bound,
            );
        } else {
            warn!(
                "Store '{}' cannot evaluate filter; scanning beyond the requested window",
                store.name(),
            );
        }

        let store_filter: &[FilterClause] = if local_filter { &[] } else { &request.filter };
        let store_sort: &[SortKey] = if local_sort { &[] } else { &request.sort };
        let filter: &[FilterClause] = if local_filter { &request.filter } else { &[] };

        let mut position = 0usize;
        let mut matched = 0usize;
        let mut window: Vec<Record> = Vec::new();
        // (match ordinal, row) so ties keep store order
        let mut ranked: Vec<(usize, Record)> = Vec::new();
        let mut buffered = 0usize;
        let mut exhausted = false;

        loop {
            let chunk = self
                .call(store, || {
                    store.fetch_window(position, self.batch_limit, store_filter, store_sort)
                })
                .await?;
            let got = chunk.len();
            position += got;

            for record in chunk.into_iter().take(self.batch_limit) {
                if !matches_all(filter, &record) {
                    continue;
                }
                if local_sort {
                    ranked.push((matched, record));
                } else if matched >= request.offset && window.len() < request.limit {
                    window.push(record);
                }
                matched += 1;
            }

            // Only the best `keep` rows can ever reach the window
            buffered = buffered.max(ranked.len());
            if local_sort && ranked.len() > keep.saturating_add(self.batch_limit) {
                Self::rank(&mut ranked, &request.sort);
                ranked.truncate(keep);
            }

            if got < self.batch_limit {
                exhausted = true;
                break;
            }
            if !local_sort && window.len() >= request.limit {
                break;
            }
        }

        if local_sort {
            Self::rank(&mut ranked, &request.sort);
            window = ranked
                .into_iter()
                .skip(request.offset)
                .take(request.limit)
                .map(|(_, record)| record)
                .collect();
        }

        if let Some(events) = &self.events {
            events.publish(DegradedScan {
                store: store.name().to_string(),
                local_filter,
                local_sort,
                rows_scanned: position,
                rows_buffered: buffered,
            });
        }

        Ok(Scan {
            rows: window,
            exhausted,
            matched: exhausted.then_some(matched),
        })
    }

    fn rank(rows: &mut [(usize, Record)], sort: &[SortKey]) {
        rows.sort_by(|(ia, a), (ib, b)| compare_records(sort, a, b).then(ia.cmp(ib)));
    }

    /// Drop hidden system columns from fetched rows
    fn project(&self, mut rows: Vec<Record>) -> Vec<Record> {
        if self.excluded_columns.is_empty() {
            return rows;
        }
        for row in &mut rows {
            row.retain(|name, _| !self.excluded_columns.iter().any(|c| c == name));
        }
        rows
    }

    /// Run a store call, retrying transient failures with exponential backoff
    async fn call<T, F, Fut>(&self, store: &dyn TabularStore, mut op: F) -> Result<T, AdapterError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 1u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() => {
                    if attempt >= self.retry.max_attempts {
                        return Err(AdapterError::StoreUnavailable {
                            attempts: attempt,
                            message: error.to_string(),
                        });
                    }

                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        "Store '{}' unavailable (attempt {}/{}), retrying in {:?}: {}",
                        store.name(),
                        attempt,
                        self.retry.max_attempts,
                        delay,
                        error
                    );
                    if let Some(events) = &self.events {
                        events.publish(FetchRetried {
                            store: store.name().to_string(),
                            attempt,
                            error: error.to_string(),
                        });
                    }

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error.into()),
            }
        }
    }
}

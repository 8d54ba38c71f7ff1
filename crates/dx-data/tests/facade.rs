//! End-to-end behaviour of the adapter facade

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dx_core::events::events::{DegradedScan, SchemaInferred};
use dx_core::{
    record, FilterClause, FilterOp, Pushdown, Record, SemanticType, SortKey, StoreError,
    TabularStore, Value,
};
use dx_data::view_state::Cursor;
use dx_data::{
    AdapterConfig, AdapterError, AdapterFacade, CsvStore, MemoryStore, ResourceCatalog,
    SqliteStore, UiRequest,
};
use tokio::sync::Notify;

fn readings(n: usize) -> Vec<Record> {
    (0..n)
        .map(|i| {
            record([
                ("_id", Value::from(i as f64)),
                ("station", Value::from(["north", "south", "east"][i % 3])),
                ("level", Value::from(i as f64 * 0.5)),
                ("taken", Value::from(format!("2023-01-{:02}", (i % 28) + 1))),
            ])
        })
        .collect()
}

fn facade_with(resource_id: &str, store: Arc<dyn TabularStore>) -> AdapterFacade {
    let catalog = ResourceCatalog::new();
    catalog.register_store(resource_id, store);
    AdapterFacade::new(Arc::new(catalog), AdapterConfig::default()).unwrap()
}

#[tokio::test]
async fn open_infers_schema_and_first_window() {
    let facade = facade_with("readings", Arc::new(MemoryStore::new("readings", readings(250))));
    let payload = facade.open("readings").await.unwrap();

    let types: Vec<_> = payload.schema.iter().map(|c| (c.name.as_str(), c.semantic_type)).collect();
    assert_eq!(
        types,
        vec![
            ("station", SemanticType::Nominal),
            ("level", SemanticType::Quantitative),
            ("taken", SemanticType::Temporal),
        ]
    );
    assert_eq!(payload.rows.len(), 100);
    assert!(payload.total_known);
    assert_eq!(payload.total_count, Some(250));
    assert!(payload.has_more);

    let more = facade.page(&payload.cursor, &UiRequest::new(0)).await.unwrap();
    assert_eq!(more.offset, 100);
    assert_eq!(more.rows[0]["level"], Value::from(50.0));
}

#[tokio::test]
async fn page_is_idempotent() {
    let facade = facade_with("readings", Arc::new(MemoryStore::new("readings", readings(60))));
    let opened = facade.open("readings").await.unwrap();

    let request = UiRequest::new(10)
        .at(5)
        .with_filter(vec![FilterClause::new("station", FilterOp::Neq, "east")])
        .with_sort(vec![SortKey::desc("level")]);

    let first = facade.page(&opened.cursor, &request).await.unwrap();
    let second = facade.page(&opened.cursor, &request).await.unwrap();
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
    assert_eq!(first.rows.len(), 10);
    assert_eq!(first.filtered_count, Some(40));
}

#[tokio::test]
async fn unknown_field_is_rejected() {
    let facade = facade_with("readings", Arc::new(MemoryStore::new("readings", readings(10))));
    let opened = facade.open("readings").await.unwrap();

    let request = UiRequest::new(10).with_filter(vec![FilterClause::new("salinity", FilterOp::Gt, 1.0)]);
    let err = facade.page(&opened.cursor, &request).await.unwrap_err();
    assert!(matches!(err, AdapterError::UnknownField(ref f) if f == "salinity"));
    assert!(!err.is_retriable());

    // excluded columns are not part of the schema either
    let request = UiRequest::new(10).with_sort(vec![SortKey::asc("_id")]);
    assert!(matches!(
        facade.page(&opened.cursor, &request).await,
        Err(AdapterError::UnknownField(_))
    ));
}

#[tokio::test]
async fn invalid_cursors_are_rejected() {
    let facade = facade_with("readings", Arc::new(MemoryStore::new("readings", readings(10))));
    let opened = facade.open("readings").await.unwrap();

    assert!(matches!(
        facade.page("%%%", &UiRequest::new(10)).await,
        Err(AdapterError::InvalidCursor(_))
    ));

    let mut future = Cursor::decode(&opened.cursor).unwrap();
    future.epoch += 5;
    assert!(matches!(
        facade.page(&future.encode().unwrap(), &UiRequest::new(10)).await,
        Err(AdapterError::InvalidCursor(_))
    ));
}

#[tokio::test]
async fn empty_resource_is_an_error() {
    let facade = facade_with("empty", Arc::new(MemoryStore::new("empty", Vec::new())));
    let err = facade.open("empty").await.unwrap_err();
    assert!(matches!(err, AdapterError::EmptyResource(_)));
    assert_eq!(facade.session_count(), 0);
}

/// Reports two million rows and generates them on demand
#[derive(Default)]
struct SyntheticStore {
    rows_served: AtomicUsize,
    max_limit: AtomicUsize,
}

#[async_trait]
impl TabularStore for SyntheticStore {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn capabilities(&self) -> Pushdown {
        Pushdown::NONE
    }

    async fn count(&self) -> Result<Option<usize>, StoreError> {
        Ok(Some(2_000_000))
    }

    async fn fetch_window(
        &self,
        offset: usize,
        limit: usize,
        _filter: &[FilterClause],
        _sort: &[SortKey],
    ) -> Result<Vec<Record>, StoreError> {
        self.max_limit.fetch_max(limit, Ordering::SeqCst);
        let end = (offset + limit).min(2_000_000);
        let rows: Vec<Record> = (offset..end)
            .map(|i| record([("n", Value::from(i as f64)), ("bucket", Value::from(format!("b{}", i % 7)))]))
            .collect();
        self.rows_served.fetch_add(rows.len(), Ordering::SeqCst);
        Ok(rows)
    }
}

#[tokio::test]
async fn large_resource_is_sampled_with_bounded_reads() {
    let store = Arc::new(SyntheticStore::default());
    let config = AdapterConfig::default();
    let catalog = ResourceCatalog::new();
    catalog.register_store("big", store.clone());
    let facade = AdapterFacade::new(Arc::new(catalog), config.clone()).unwrap();

    let payload = facade.open("big").await.unwrap();
    assert_eq!(payload.total_count, Some(2_000_000));
    assert_eq!(payload.rows.len(), config.default_window);

    assert!(store.max_limit.load(Ordering::SeqCst) <= config.store_batch_limit);
    assert!(
        store.rows_served.load(Ordering::SeqCst) <= config.max_sample_scan + config.default_window
    );
}

/// Blocks the first armed fetch until released
struct GatedStore {
    inner: MemoryStore,
    armed: AtomicBool,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl TabularStore for GatedStore {
    fn name(&self) -> &str {
        "gated"
    }

    fn capabilities(&self) -> Pushdown {
        Pushdown::FULL
    }

    async fn count(&self) -> Result<Option<usize>, StoreError> {
        self.inner.count().await
    }

    async fn fetch_window(
        &self,
        offset: usize,
        limit: usize,
        filter: &[FilterClause],
        sort: &[SortKey],
    ) -> Result<Vec<Record>, StoreError> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.fetch_window(offset, limit, filter, sort).await
    }
}

#[tokio::test]
async fn superseded_request_is_discarded() {
    let store = Arc::new(GatedStore {
        inner: MemoryStore::new("inner", readings(40)).with_pushdown(Pushdown::FULL),
        armed: AtomicBool::new(false),
        entered: Notify::new(),
        release: Notify::new(),
    });
    let facade = Arc::new(facade_with("readings", store.clone()));
    let opened = facade.open("readings").await.unwrap();
    let session_id = Cursor::decode(&opened.cursor).unwrap().session;

    store.armed.store(true, Ordering::SeqCst);
    let slow = tokio::spawn({
        let facade = facade.clone();
        let cursor = opened.cursor.clone();
        async move { facade.page(&cursor, &UiRequest::new(10).at(0)).await }
    });
    tokio::time::timeout(Duration::from_secs(5), store.entered.notified())
        .await
        .unwrap();

    let fresh = facade.page(&opened.cursor, &UiRequest::new(5).at(20)).await.unwrap();
    store.release.notify_one();

    let stale = tokio::time::timeout(Duration::from_secs(5), slow)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(stale, Err(AdapterError::Superseded { .. })));

    let latest = facade.session(session_id).unwrap().latest_view().unwrap();
    assert_eq!(latest.payload.offset, 20);
    assert_eq!(latest.payload, fresh);
}

#[tokio::test]
async fn version_change_triggers_reinference() {
    let store = Arc::new(MemoryStore::new("readings", readings(10)).with_version("v1"));
    let facade = facade_with("readings", store.clone());

    let inferred = Arc::new(AtomicUsize::new(0));
    facade.events().subscribe_fn::<SchemaInferred, _>({
        let inferred = inferred.clone();
        move |_| {
            inferred.fetch_add(1, Ordering::SeqCst);
        }
    });

    let opened = facade.open("readings").await.unwrap();
    let unchanged = facade.page(&opened.cursor, &UiRequest::new(5).at(0)).await.unwrap();
    assert_eq!(unchanged.schema, opened.schema);
    assert_eq!(inferred.load(Ordering::SeqCst), 1);

    let reloaded: Vec<Record> = readings(10)
        .into_iter()
        .map(|mut row| {
            row.insert("flag".to_string(), Value::from("ok"));
            row
        })
        .collect();
    store.replace_rows(reloaded, "v2");

    let refreshed = facade.page(&opened.cursor, &UiRequest::new(5).at(0)).await.unwrap();
    assert_eq!(inferred.load(Ordering::SeqCst), 2);
    assert!(refreshed.schema.iter().any(|c| c.name == "flag"));
    assert_eq!(Cursor::decode(&refreshed.cursor).unwrap().epoch, 2);
}

#[tokio::test]
async fn degraded_filter_reports_filtered_count() {
    let facade = facade_with("readings", Arc::new(MemoryStore::new("readings", readings(30))));

    let scans = Arc::new(AtomicUsize::new(0));
    facade.events().subscribe_fn::<DegradedScan, _>({
        let scans = scans.clone();
        move |_| {
            scans.fetch_add(1, Ordering::SeqCst);
        }
    });

    let opened = facade.open("readings").await.unwrap();
    let request = UiRequest::new(100).with_filter(vec![FilterClause::new("station", FilterOp::Eq, "north")]);
    let payload = facade.page(&opened.cursor, &request).await.unwrap();

    assert_eq!(payload.rows.len(), 10);
    assert!(payload.rows.iter().all(|r| r["station"] == Value::from("north")));
    assert!(payload.filtered_count_known);
    assert_eq!(payload.filtered_count, Some(10));
    assert_eq!(payload.total_count, Some(30));
    assert_eq!(scans.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn sqlite_resource_pushes_filter_and_sort() {
    let file = tempfile::Builder::new().suffix(".db").tempfile().unwrap();
    {
        let conn = rusqlite::Connection::open(file.path()).unwrap();
        conn.execute_batch(
            "CREATE TABLE wells (id INTEGER PRIMARY KEY, region TEXT, depth REAL);
             INSERT INTO wells (region, depth) VALUES ('a', 10.0), ('b', 25.5), ('a', 7.25), ('c', NULL);",
        )
        .unwrap();
    }

    let store = SqliteStore::open(file.path(), "wells").await.unwrap();
    let facade = facade_with("wells", Arc::new(store));
    let opened = facade.open("wells").await.unwrap();
    assert!(opened.schema.iter().all(|c| c.name != "id"));

    let request = UiRequest::new(10)
        .with_filter(vec![FilterClause::new("region", FilterOp::Eq, "a")])
        .with_sort(vec![SortKey::desc("depth")]);
    let payload = facade.page(&opened.cursor, &request).await.unwrap();

    assert_eq!(payload.filtered_count, Some(2));
    assert_eq!(payload.rows[0]["depth"], Value::from(10.0));
    assert_eq!(payload.rows[1]["depth"], Value::from(7.25));
}

fn write_gauges(path: &std::path::Path, rows: usize, with_extra: bool) {
    let mut body = String::from(if with_extra { "name,v,extra\n" } else { "name,v\n" });
    for i in 0..rows {
        if with_extra {
            body.push_str(&format!("gauge{},{},tag{}\n", i, i, i % 4));
        } else {
            body.push_str(&format!("gauge{},{}\n", i, i));
        }
    }
    std::fs::write(path, body).unwrap();
}

#[tokio::test]
async fn csv_rewritten_between_open_and_page() {
    let file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
    write_gauges(file.path(), 20, false);

    let store = CsvStore::open(file.path()).await.unwrap();
    let facade = facade_with("gauges", Arc::new(store));
    let opened = facade.open("gauges").await.unwrap();
    assert_eq!(opened.total_count, Some(20));
    assert!(opened.schema.iter().all(|c| c.name != "extra"));

    write_gauges(file.path(), 40, true);
    let payload = facade
        .page(&opened.cursor, &UiRequest::new(100).at(0))
        .await
        .unwrap();

    assert_eq!(payload.total_count, Some(40));
    assert_eq!(payload.rows.len(), 40);
    assert!(!payload.has_more);
    assert!(payload.schema.iter().any(|c| c.name == "extra"));
    assert_eq!(payload.rows[0]["name"], Value::from("gauge0"));
    assert_eq!(payload.rows[39]["extra"], Value::from("tag3"));
}

#[tokio::test]
async fn sqlite_added_column_is_filterable() {
    let file = tempfile::Builder::new().suffix(".db").tempfile().unwrap();
    let conn = rusqlite::Connection::open(file.path()).unwrap();
    conn.execute_batch(
        "CREATE TABLE t (seq INTEGER, region TEXT);
         INSERT INTO t VALUES (1, 'a'), (2, 'b'), (3, 'a'), (4, 'c');",
    )
    .unwrap();

    let store = SqliteStore::open(file.path(), "t").await.unwrap();
    let facade = facade_with("t", Arc::new(store));
    let opened = facade.open("t").await.unwrap();
    assert!(opened.schema.iter().all(|c| c.name != "grade"));

    conn.execute_batch(
        "ALTER TABLE t ADD COLUMN grade TEXT;
         UPDATE t SET grade = CASE WHEN seq % 2 = 0 THEN 'even' ELSE 'odd' END;",
    )
    .unwrap();

    let request = UiRequest::new(10)
        .at(0)
        .with_filter(vec![FilterClause::new("grade", FilterOp::Eq, "even")])
        .with_sort(vec![SortKey::desc("grade")]);
    let payload = facade.page(&opened.cursor, &request).await.unwrap();

    assert!(payload.schema.iter().any(|c| c.name == "grade"));
    assert_eq!(payload.filtered_count, Some(2));
    assert_eq!(payload.rows.len(), 2);
    assert!(payload.rows.iter().all(|row| row["grade"] == Value::from("even")));
}

//! File-backed CSV/TSV store

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use csv::{Position, ReaderBuilder, StringRecord};
use dx_core::{FilterClause, Pushdown, Record, SortKey, StoreError, TabularStore, Value};
use parking_lot::RwLock;
use tracing::info;

use crate::config::NullConfig;

/// A seek position is remembered every this many rows
const INDEX_STRIDE: usize = 10_000;

/// Headers, row count and seek positions of one version of the file
struct FileIndex {
    version: String,
    headers: Arc<Vec<String>>,
    row_count: usize,
    /// Byte position of every INDEX_STRIDE-th record
    row_index: Vec<Position>,
}

/// CSV file read window by window; no pushdown.
///
/// The index is rebuilt whenever the file's version changes, so a rewritten
/// file is never read through the seek positions of its predecessor.
pub struct CsvStore {
    /// Path to the CSV file
    path: PathBuf,
    name: String,
    delimiter: u8,
    index: RwLock<Arc<FileIndex>>,
    null_config: NullConfig,
}

impl CsvStore {
    /// Open a CSV file; `.tsv` files are read tab-separated
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::open_with(path, NullConfig::default()).await
    }

    /// Open a CSV file with custom null handling
    pub async fn open_with(path: impl Into<PathBuf>, null_config: NullConfig) -> Result<Self, StoreError> {
        let path = path.into();
        let delimiter = Self::delimiter_for(&path);
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown.csv")
            .to_string();

        let index = Self::build_index(&path, delimiter).await?;
        info!("Indexed {} rows of {}", index.row_count, name);

        Ok(Self {
            path,
            name,
            delimiter,
            index: RwLock::new(Arc::new(index)),
            null_config,
        })
    }

    /// Column names of the file as last indexed
    pub fn headers(&self) -> Arc<Vec<String>> {
        self.index.read().headers.clone()
    }

    /// Index matching the file on disk, rebuilt if the file changed
    async fn current_index(&self) -> Result<Arc<FileIndex>, StoreError> {
        let version = file_version(&self.path).await?;
        let cached = self.index.read().clone();
        if cached.version == version {
            return Ok(cached);
        }

        let index = Arc::new(Self::build_index(&self.path, self.delimiter).await?);
        info!(
            "{} changed on disk; re-indexed {} rows and {} columns",
            self.name,
            index.row_count,
            index.headers.len()
        );
        *self.index.write() = index.clone();
        Ok(index)
    }

    async fn build_index(path: &Path, delimiter: u8) -> Result<FileIndex, StoreError> {
        let version = file_version(path).await?;
        let (headers, row_count, row_index) = tokio::task::spawn_blocking({
            let path = path.to_path_buf();
            move || Self::analyze_file(&path, delimiter)
        })
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))??;

        Ok(FileIndex {
            version,
            headers: Arc::new(headers),
            row_count,
            row_index,
        })
    }

    fn delimiter_for(path: &Path) -> u8 {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("tsv") => b'\t',
            _ => b',',
        }
    }

    /// Read headers, count rows and build the seek index in one pass
    fn analyze_file(path: &Path, delimiter: u8) -> Result<(Vec<String>, usize, Vec<Position>), StoreError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_path(path)
            .map_err(|e| map_open_error(path, e))?;

        let headers = reader
            .headers()
            .map_err(map_csv_error)?
            .iter()
            .map(|h| h.trim().to_string())
            .collect::<Vec<_>>();

        let mut record = StringRecord::new();
        let mut row_index = Vec::new();
        let mut row_count = 0usize;
        loop {
            if row_count % INDEX_STRIDE == 0 {
                row_index.push(reader.position().clone());
            }
            if !reader.read_record(&mut record).map_err(map_csv_error)? {
                break;
            }
            row_count += 1;
        }

        Ok((headers, row_count, row_index))
    }

    /// Read `limit` rows starting `skip` rows after `start`
    fn read_rows(
        path: &Path,
        delimiter: u8,
        headers: &[String],
        null_config: &NullConfig,
        start: Position,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Record>, StoreError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_path(path)
            .map_err(|e| map_open_error(path, e))?;
        reader.seek(start).map_err(map_csv_error)?;

        let mut record = StringRecord::new();
        for _ in 0..skip {
            if !reader.read_record(&mut record).map_err(map_csv_error)? {
                return Ok(Vec::new());
            }
        }

        let mut rows = Vec::with_capacity(limit);
        while rows.len() < limit && reader.read_record(&mut record).map_err(map_csv_error)? {
            let row: Record = headers
                .iter()
                .enumerate()
                .map(|(idx, name)| {
                    let value = record
                        .get(idx)
                        .map(|raw| null_config.parse_cell(raw))
                        .unwrap_or(Value::Null);
                    (name.clone(), value)
                })
                .collect();
            rows.push(row);
        }
        Ok(rows)
    }
}

/// Modification time and length of the file
async fn file_version(path: &Path) -> Result<String, StoreError> {
    let metadata = tokio::fs::metadata(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => StoreError::NotFound(path.display().to_string()),
        _ => StoreError::Unavailable(e.to_string()),
    })?;
    let modified = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    Ok(format!("{}-{}", modified, metadata.len()))
}

fn map_open_error(path: &Path, error: csv::Error) -> StoreError {
    match error.kind() {
        csv::ErrorKind::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
            StoreError::NotFound(path.display().to_string())
        }
        _ => map_csv_error(error),
    }
}

fn map_csv_error(error: csv::Error) -> StoreError {
    match error.kind() {
        csv::ErrorKind::Io(_) => StoreError::Unavailable(error.to_string()),
        _ => StoreError::Query(error.to_string()),
    }
}

#[async_trait]
impl TabularStore for CsvStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Pushdown {
        Pushdown::NONE
    }

    async fn count(&self) -> Result<Option<usize>, StoreError> {
        Ok(Some(self.current_index().await?.row_count))
    }

    async fn fetch_window(
        &self,
        offset: usize,
        limit: usize,
        _filter: &[FilterClause],
        _sort: &[SortKey],
    ) -> Result<Vec<Record>, StoreError> {
        let index = self.current_index().await?;
        if offset >= index.row_count || limit == 0 || index.row_index.is_empty() {
            return Ok(Vec::new());
        }

        let stride = (offset / INDEX_STRIDE).min(index.row_index.len() - 1);
        let start = index.row_index[stride].clone();
        let skip = offset - stride * INDEX_STRIDE;

        let path = self.path.clone();
        let delimiter = self.delimiter;
        let headers = index.headers.clone();
        let null_config = self.null_config.clone();

        tokio::task::spawn_blocking(move || {
            Self::read_rows(&path, delimiter, &headers, &null_config, start, skip, limit)
        })
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?
    }

    async fn version(&self) -> Result<Option<String>, StoreError> {
        file_version(&self.path).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(rows: usize) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "id,city,temp,when").unwrap();
        for i in 0..rows {
            writeln!(file, "{},city{},{}.5,2023-01-{:02}", i, i % 3, i, (i % 28) + 1).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_open_counts_rows() {
        let file = write_csv(12);
        let store = CsvStore::open(file.path()).await.unwrap();
        assert_eq!(store.count().await.unwrap(), Some(12));
        assert_eq!(*store.headers(), vec!["id", "city", "temp", "when"]);
        assert_eq!(store.capabilities(), Pushdown::NONE);
    }

    #[tokio::test]
    async fn test_window_across_index_stride() {
        let file = write_csv(INDEX_STRIDE + 20);
        let store = CsvStore::open(file.path()).await.unwrap();

        let rows = store.fetch_window(INDEX_STRIDE - 2, 5, &[], &[]).await.unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0]["id"], Value::Number((INDEX_STRIDE - 2) as f64));
        assert_eq!(rows[4]["id"], Value::Number((INDEX_STRIDE + 2) as f64));

        let tail = store.fetch_window(INDEX_STRIDE + 18, 10, &[], &[]).await.unwrap();
        assert_eq!(tail.len(), 2);
    }

    #[tokio::test]
    async fn test_cells_are_typed() {
        let mut file = tempfile::Builder::new().suffix(".tsv").tempfile().unwrap();
        writeln!(file, "name\tscore").unwrap();
        writeln!(file, "ann\t3").unwrap();
        writeln!(file, "bob\tN/A").unwrap();
        writeln!(file, "cy").unwrap();
        file.flush().unwrap();

        let store = CsvStore::open(file.path()).await.unwrap();
        let rows = store.fetch_window(0, 10, &[], &[]).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["score"], Value::Number(3.0));
        assert_eq!(rows[1]["score"], Value::Null);
        assert_eq!(rows[2]["score"], Value::Null);
        assert_eq!(rows[2]["name"], Value::Text("cy".into()));
    }

    #[tokio::test]
    async fn test_rewritten_file_is_reindexed() {
        let file = write_csv(5);
        let store = CsvStore::open(file.path()).await.unwrap();
        let before = store.version().await.unwrap();

        let mut body = String::from("id,city,temp,when,station\n");
        for i in 0..9 {
            body.push_str(&format!("{},north,{}.0,2024-02-01,s{}\n", 100 + i, i, i));
        }
        std::fs::write(file.path(), body).unwrap();

        assert_ne!(store.version().await.unwrap(), before);
        assert_eq!(store.count().await.unwrap(), Some(9));

        let rows = store.fetch_window(0, 20, &[], &[]).await.unwrap();
        assert_eq!(rows.len(), 9);
        assert_eq!(rows[0]["id"], Value::Number(100.0));
        assert_eq!(rows[0]["station"], Value::Text("s0".into()));
        assert_eq!(store.headers().len(), 5);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let result = CsvStore::open("/nonexistent/data.csv").await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }
}

//! SQLite table store with filter and sort pushdown

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dx_core::{
    ColumnMetadata, FilterClause, FilterOp, Pushdown, Record, SemanticType, SortDirection, SortKey,
    StoreError, TabularStore, Value,
};
use rusqlite::types::{Value as SqlValue, ValueRef};
use parking_lot::RwLock;
use rusqlite::{Connection, ErrorCode, OpenFlags};
use tracing::{debug, info};

/// A table column as declared in the database
#[derive(Debug, Clone)]
struct TableColumn {
    name: String,
    declared_type: String,
}

/// SQLite table read through SQL queries
pub struct SqliteStore {
    path: PathBuf,
    table_name: String,
    name: String,
    /// Last `PRAGMA table_info` result; reloaded when a field is missing from it
    columns: RwLock<Arc<Vec<TableColumn>>>,
}

impl SqliteStore {
    /// Open a table of a SQLite database read-only
    pub async fn open<P: AsRef<Path>>(path: P, table_name: impl Into<String>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let table_name = table_name.into();

        let columns = tokio::task::spawn_blocking({
            let path = path.clone();
            let table_name = table_name.clone();
            move || {
                let conn = Self::connect(&path)?;
                Self::detect_columns(&conn, &table_name)
            }
        })
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))??;

        info!("Opened SQLite table '{}' with {} columns", table_name, columns.len());

        Ok(Self {
            name: format!("{}:{}", path.display(), table_name),
            path,
            table_name,
            columns: RwLock::new(Arc::new(columns)),
        })
    }

    /// List the tables of a database, for hosts that let users pick one
    pub async fn list_tables<P: AsRef<Path>>(path: P) -> Result<Vec<String>, StoreError> {
        let path = path.as_ref().to_path_buf();
        tokio::task::spawn_blocking(move || {
            let conn = Self::connect(&path)?;
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name")
                .map_err(map_sqlite_error)?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(map_sqlite_error)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(map_sqlite_error)?;
            Ok(names)
        })
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?
    }

    fn connect(path: &Path) -> Result<Connection, StoreError> {
        if !path.exists() {
            return Err(StoreError::NotFound(path.display().to_string()));
        }
        Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX)
            .map_err(map_sqlite_error)
    }

    /// Read column names and declared types of a table
    fn detect_columns(conn: &Connection, table_name: &str) -> Result<Vec<TableColumn>, StoreError> {
        let query = format!("PRAGMA table_info({})", quote_ident(table_name));
        let mut stmt = conn.prepare(&query).map_err(map_sqlite_error)?;
        let columns = stmt
            .query_map([], |row| {
                Ok(TableColumn {
                    name: row.get::<_, String>(1)?,
                    declared_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                })
            })
            .map_err(map_sqlite_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_sqlite_error)?;

        if columns.is_empty() {
            return Err(StoreError::NotFound(format!("table '{}'", table_name)));
        }
        Ok(columns)
    }

    /// Run a blocking query against a fresh read-only connection
    async fn with_connection<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Self::connect(&path)?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?
    }

    /// Re-read the table's columns, picking up `ALTER TABLE` changes
    async fn reload_columns(&self) -> Result<Arc<Vec<TableColumn>>, StoreError> {
        let table_name = self.table_name.clone();
        let columns = Arc::new(
            self.with_connection(move |conn| Self::detect_columns(conn, &table_name))
                .await?,
        );

        let previous = std::mem::replace(&mut *self.columns.write(), columns.clone());
        if previous.len() != columns.len() {
            info!(
                "Table '{}' now has {} columns (was {})",
                self.table_name,
                columns.len(),
                previous.len()
            );
        }
        Ok(columns)
    }

    /// Columns covering every field the query names
    async fn columns_for(
        &self,
        filter: &[FilterClause],
        sort: &[SortKey],
    ) -> Result<Arc<Vec<TableColumn>>, StoreError> {
        let cached = self.columns.read().clone();
        let mut fields = filter
            .iter()
            .map(|clause| clause.field.as_str())
            .chain(sort.iter().map(|key| key.field.as_str()));
        if fields.all(|field| cached.iter().any(|c| c.name == field)) {
            return Ok(cached);
        }
        self.reload_columns().await
    }

    /// Modification stamps of the database and its write-ahead log, plus the schema cookie
    fn database_version(path: &Path) -> Result<String, StoreError> {
        let conn = Self::connect(path)?;
        let schema_version: i64 = conn
            .query_row("PRAGMA schema_version", [], |row| row.get(0))
            .map_err(map_sqlite_error)?;

        let mut wal = path.as_os_str().to_owned();
        wal.push("-wal");
        Ok(format!(
            "{}-{}-s{}",
            file_stamp(path)?,
            file_stamp(Path::new(&wal)).unwrap_or_default(),
            schema_version
        ))
    }

    /// `WHERE` clause and its bound parameters
    fn where_clause(
        columns: &[TableColumn],
        filter: &[FilterClause],
    ) -> Result<(String, Vec<SqlValue>), StoreError> {
        if filter.is_empty() {
            return Ok((String::new(), Vec::new()));
        }

        let mut conditions = Vec::with_capacity(filter.len());
        let mut params = Vec::new();
        for clause in filter {
            let column = quote_ident(column_named(columns, &clause.field)?);
            let condition = match clause.op {
                FilterOp::IsNull => format!("{} IS NULL", column),
                FilterOp::NotNull => format!("{} IS NOT NULL", column),
                FilterOp::In => {
                    let values = clause.value.values();
                    if values.is_empty() {
                        "0".to_string()
                    } else {
                        params.extend(values.iter().map(to_sql_value));
                        let marks = vec!["?"; values.len()].join(", ");
                        format!("{} IN ({})", column, marks)
                    }
                }
                FilterOp::Contains => {
                    params.push(to_sql_value(first_value(clause)));
                    format!("instr(lower(CAST({} AS TEXT)), lower(?)) > 0", column)
                }
                op => {
                    params.push(to_sql_value(first_value(clause)));
                    let symbol = match op {
                        FilterOp::Eq => "=",
                        FilterOp::Neq => "<>",
                        FilterOp::Lt => "<",
                        FilterOp::Lte => "<=",
                        FilterOp::Gt => ">",
                        _ => ">=",
                    };
                    format!("{} {} ?", column, symbol)
                }
            };
            conditions.push(condition);
        }

        Ok((format!(" WHERE {}", conditions.join(" AND ")), params))
    }

    fn order_clause(columns: &[TableColumn], sort: &[SortKey]) -> Result<String, StoreError> {
        if sort.is_empty() {
            return Ok(String::new());
        }
        let keys = sort
            .iter()
            .map(|key| {
                let direction = match key.direction {
                    SortDirection::Asc => "ASC",
                    SortDirection::Desc => "DESC",
                };
                Ok(format!("{} {} NULLS LAST", quote_ident(column_named(columns, &key.field)?), direction))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        Ok(format!(" ORDER BY {}", keys.join(", ")))
    }
}

fn column_named<'a>(columns: &'a [TableColumn], field: &str) -> Result<&'a str, StoreError> {
    columns
        .iter()
        .find(|c| c.name == field)
        .map(|c| c.name.as_str())
        .ok_or_else(|| StoreError::Query(format!("no such column: {}", field)))
}

/// `<mtime nanos>-<length>` of a file
fn file_stamp(path: &Path) -> Result<String, StoreError> {
    let metadata = std::fs::metadata(path).map_err(|e| StoreError::Unavailable(e.to_string()))?;
    let modified = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    Ok(format!("{}-{}", modified, metadata.len()))
}

#[async_trait]
impl TabularStore for SqliteStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Pushdown {
        Pushdown::FULL
    }

    async fn count(&self) -> Result<Option<usize>, StoreError> {
        self.count_filtered(&[]).await
    }

    async fn count_filtered(&self, filter: &[FilterClause]) -> Result<Option<usize>, StoreError> {
        let columns = self.columns_for(filter, &[]).await?;
        let (where_sql, params) = Self::where_clause(&columns, filter)?;
        let query = format!("SELECT COUNT(*) FROM {}{}", quote_ident(&self.table_name), where_sql);

        self.with_connection(move |conn| {
            let count: i64 = conn
                .query_row(&query, rusqlite::params_from_iter(params), |row| row.get(0))
                .map_err(map_sqlite_error)?;
            Ok(Some(count.max(0) as usize))
        })
        .await
    }

    async fn fetch_window(
        &self,
        offset: usize,
        limit: usize,
        filter: &[FilterClause],
        sort: &[SortKey],
    ) -> Result<Vec<Record>, StoreError> {
        let columns = self.columns_for(filter, sort).await?;
        let (where_sql, mut params) = Self::where_clause(&columns, filter)?;
        let order_sql = Self::order_clause(&columns, sort)?;
        let query = format!(
            "SELECT * FROM {}{}{} LIMIT ? OFFSET ?",
            quote_ident(&self.table_name),
            where_sql,
            order_sql
        );
        params.push(SqlValue::Integer(limit as i64));
        params.push(SqlValue::Integer(offset as i64));
        debug!("{}", query);

        self.with_connection(move |conn| {
            let mut stmt = conn.prepare(&query).map_err(map_sqlite_error)?;
            let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
            let mut rows = stmt
                .query(rusqlite::params_from_iter(params))
                .map_err(map_sqlite_error)?;

            let mut records = Vec::with_capacity(limit);
            while let Some(row) = rows.next().map_err(map_sqlite_error)? {
                let mut record = Record::with_capacity(names.len());
                for (idx, name) in names.iter().enumerate() {
                    let value = row.get_ref(idx).map_err(map_sqlite_error)?;
                    record.insert(name.clone(), from_sql_value(value));
                }
                records.push(record);
            }
            Ok(records)
        })
        .await
    }

    async fn column_metadata(&self) -> Result<Vec<ColumnMetadata>, StoreError> {
        Ok(self
            .reload_columns()
            .await?
            .iter()
            .map(|column| ColumnMetadata {
                name: column.name.clone(),
                declared_type: semantic_type_for(&column.declared_type),
                label: None,
            })
            .collect())
    }

    async fn version(&self) -> Result<Option<String>, StoreError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || Self::database_version(&path))
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
            .map(Some)
    }
}

/// Declared SQL types that fix the semantic type; text is left to inference
fn semantic_type_for(declared: &str) -> Option<SemanticType> {
    let upper = declared.to_uppercase();
    if upper.contains("DATE") || upper.contains("TIME") {
        Some(SemanticType::Temporal)
    } else if upper.contains("BOOL") {
        Some(SemanticType::Nominal)
    } else if upper.contains("INT")
        || upper.contains("REAL")
        || upper.contains("FLOA")
        || upper.contains("DOUB")
        || upper.contains("NUMERIC")
        || upper.contains("DECIMAL")
    {
        Some(SemanticType::Quantitative)
    } else {
        None
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn first_value(clause: &FilterClause) -> &Value {
    clause.value.values().first().unwrap_or(&Value::Null)
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => SqlValue::Integer(*n as i64),
        Value::Number(n) => SqlValue::Real(*n),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Date(d) => SqlValue::Text(d.format("%Y-%m-%d %H:%M:%S").to_string()),
        Value::Null => SqlValue::Null,
    }
}

fn from_sql_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i as f64),
        ValueRef::Real(f) => Value::Number(f),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Text(format!("<{} bytes>", bytes.len())),
    }
}

fn map_sqlite_error(error: rusqlite::Error) -> StoreError {
    match &error {
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(
                failure.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::CannotOpen
            ) =>
        {
            StoreError::Unavailable(error.to_string())
        }
        _ => StoreError::Query(error.to_string()),
    }
}

//! Arrow record batches as an in-memory store

use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type, Schema as ArrowSchema, TimeUnit, TimestampMillisecondType};
use arrow::record_batch::RecordBatch;
use chrono::DateTime;
use dx_core::{ColumnMetadata, Record, SemanticType, StoreError, Value};
use tracing::debug;

use super::MemoryStore;

/// Arrow type to semantic type hint; strings are left to inference
fn semantic_type_for(data_type: &DataType) -> Option<SemanticType> {
    match data_type {
        dt if dt.is_numeric() => Some(SemanticType::Quantitative),
        DataType::Date32 | DataType::Date64 | DataType::Timestamp(_, _) => Some(SemanticType::Temporal),
        DataType::Boolean => Some(SemanticType::Nominal),
        _ => None,
    }
}

/// Column hints from an Arrow schema; a `label` field metadata entry becomes the title
pub fn metadata_from_schema(schema: &ArrowSchema) -> Vec<ColumnMetadata> {
    schema
        .fields()
        .iter()
        .map(|field| ColumnMetadata {
            name: field.name().clone(),
            declared_type: semantic_type_for(field.data_type()),
            label: field.metadata().get("label").cloned(),
        })
        .collect()
}

/// Convert one Arrow column to cell values
fn column_values(array: &ArrayRef) -> Result<Vec<Value>, StoreError> {
    let cast_error = |e: arrow::error::ArrowError| StoreError::Query(e.to_string());
    let len = array.len();

    let values = match array.data_type() {
        dt if dt.is_numeric() => {
            let numbers = cast(array, &DataType::Float64).map_err(cast_error)?;
            let numbers = numbers.as_primitive::<Float64Type>();
            (0..len)
                .map(|i| {
                    if numbers.is_null(i) {
                        Value::Null
                    } else {
                        Value::Number(numbers.value(i))
                    }
                })
                .collect()
        }
        DataType::Date32 | DataType::Date64 | DataType::Timestamp(_, _) => {
            let millis = cast(array, &DataType::Timestamp(TimeUnit::Millisecond, None)).map_err(cast_error)?;
            let millis = millis.as_primitive::<TimestampMillisecondType>();
            (0..len)
                .map(|i| {
                    if millis.is_null(i) {
                        return Value::Null;
                    }
                    DateTime::from_timestamp_millis(millis.value(i))
                        .map(|dt| Value::Date(dt.naive_utc()))
                        .unwrap_or(Value::Null)
                })
                .collect()
        }
        DataType::Boolean => {
            let flags = array.as_boolean();
            (0..len)
                .map(|i| {
                    if flags.is_null(i) {
                        Value::Null
                    } else {
                        Value::Text(flags.value(i).to_string())
                    }
                })
                .collect()
        }
        _ => {
            let text = cast(array, &DataType::Utf8).map_err(cast_error)?;
            let text = text.as_string::<i32>();
            (0..len)
                .map(|i| {
                    if text.is_null(i) {
                        Value::Null
                    } else {
                        Value::Text(text.value(i).to_string())
                    }
                })
                .collect()
        }
    };
    Ok(values)
}

/// Convert a record batch to row records
pub fn records_from_batch(batch: &RecordBatch) -> Result<Vec<Record>, StoreError> {
    let schema = batch.schema();
    let columns = batch
        .columns()
        .iter()
        .map(column_values)
        .collect::<Result<Vec<_>, _>>()?;

    let rows = (0..batch.num_rows())
        .map(|row| {
            schema
                .fields()
                .iter()
                .zip(&columns)
                .map(|(field, values)| (field.name().clone(), values[row].clone()))
                .collect::<Record>()
        })
        .collect();
    Ok(rows)
}

impl MemoryStore {
    /// Build a store from Arrow batches; declared column types become hints
    pub fn from_record_batches(name: impl Into<String>, batches: &[RecordBatch]) -> Result<Self, StoreError> {
        let name = name.into();
        let metadata = batches
            .first()
            .map(|b| metadata_from_schema(&b.schema()))
            .unwrap_or_default();

        let mut rows = Vec::with_capacity(batches.iter().map(|b| b.num_rows()).sum());
        for batch in batches {
            rows.extend(records_from_batch(batch)?);
        }
        debug!("Loaded {} rows from {} Arrow batches into '{}'", rows.len(), batches.len(), name);

        Ok(MemoryStore::new(name, rows).with_metadata(metadata))
    }
}

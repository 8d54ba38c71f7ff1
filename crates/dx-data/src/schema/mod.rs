//! Schema inference over a bounded sample of records

use ahash::AHashSet;
use dx_core::{Cardinality, Column, ColumnMetadata, Record, Schema, SemanticType, Value};
use indexmap::IndexMap;
use tracing::debug;

use crate::config::{AdapterConfig, NullConfig};
use crate::AdapterError;

/// Derives a visualization schema from sampled rows
#[derive(Debug, Clone)]
pub struct SchemaInferencer {
    low_cardinality_ratio: f64,
    null_config: NullConfig,
    datetime_formats: Vec<String>,
    excluded_columns: Vec<String>,
}

/// Type signals gathered for one column
#[derive(Debug, Default)]
struct ColumnStats {
    null_count: usize,
    non_null_count: usize,
    all_numeric: bool,
    all_temporal: bool,
    distinct: AHashSet<String>,
}

impl ColumnStats {
    fn new() -> Self {
        Self {
            all_numeric: true,
            all_temporal: true,
            ..Default::default()
        }
    }
}

impl SchemaInferencer {
    /// Create an inferencer with default thresholds
    pub fn new() -> Self {
        Self::from_config(&AdapterConfig::default())
    }

    pub fn from_config(config: &AdapterConfig) -> Self {
        Self {
            low_cardinality_ratio: config.low_cardinality_ratio,
            null_config: config.null_config.clone(),
            datetime_formats: config.datetime_formats.clone(),
            excluded_columns: config.excluded_columns.clone(),
        }
    }

    /// Set the distinct-ratio threshold for low cardinality
    pub fn with_low_cardinality_ratio(mut self, ratio: f64) -> Self {
        self.low_cardinality_ratio = ratio;
        self
    }

    /// Set the columns that never appear in a schema
    pub fn with_excluded_columns(mut self, columns: Vec<String>) -> Self {
        self.excluded_columns = columns;
        self
    }

    /// Infer a schema from `sample`, honouring explicit store `hints`.
    ///
    /// An empty sample yields an empty schema.
    pub fn infer(&self, sample: &[Record], hints: &[ColumnMetadata]) -> Schema {
        if sample.is_empty() {
            return Schema::empty();
        }

        let mut stats: IndexMap<&str, ColumnStats> = IndexMap::new();
        for hint in hints {
            if !self.is_excluded(&hint.name) {
                stats.entry(hint.name.as_str()).or_insert_with(ColumnStats::new);
            }
        }
        for record in sample {
            for name in record.keys() {
                if !self.is_excluded(name) {
                    stats.entry(name.as_str()).or_insert_with(ColumnStats::new);
                }
            }
        }

        for (name, column) in stats.iter_mut() {
            for record in sample {
                self.observe(column, record.get(*name).unwrap_or(&Value::Null));
            }
        }

        let columns = stats
            .into_iter()
            .map(|(name, stats)| {
                let hint = hints.iter().find(|h| h.name == name);
                self.build_column(name, &stats, hint, sample.len())
            })
            .collect::<Vec<_>>();

        debug!("Inferred {} columns from {} sampled rows", columns.len(), sample.len());
        Schema::new(columns)
    }

    /// Like [`infer`](Self::infer), but an empty sample is an error
    pub fn infer_checked(
        &self,
        resource_id: &str,
        sample: &[Record],
        hints: &[ColumnMetadata],
    ) -> Result<Schema, AdapterError> {
        let schema = self.infer(sample, hints);
        if schema.is_empty() {
            return Err(AdapterError::EmptyResource(resource_id.to_string()));
        }
        Ok(schema)
    }

    fn is_excluded(&self, name: &str) -> bool {
        self.excluded_columns.iter().any(|c| c == name)
    }

    /// Fold one cell into the column statistics
    fn observe(&self, stats: &mut ColumnStats, value: &Value) {
        if self.null_config.is_null(value) {
            stats.null_count += 1;
            return;
        }
        stats.non_null_count += 1;

        match value {
            Value::Number(_) => stats.all_temporal = false,
            Value::Date(_) => stats.all_numeric = false,
            Value::Text(text) => {
                if stats.all_numeric && dx_core::value::parse_number(text).is_none() {
                    stats.all_numeric = false;
                }
                if stats.all_temporal
                    && dx_core::value::parse_datetime_with(text, &self.datetime_formats).is_none()
                {
                    stats.all_temporal = false;
                }
            }
            Value::Null => {}
        }

        stats.distinct.insert(value.to_text());
    }

    /// Cardinality compares distinct values against the whole sample, nulls included
    fn build_column(
        &self,
        name: &str,
        stats: &ColumnStats,
        hint: Option<&ColumnMetadata>,
        sample_size: usize,
    ) -> Column {
        let cardinality = if stats.non_null_count == 0 || sample_size == 0 {
            Cardinality::Low
        } else {
            let ratio = stats.distinct.len() as f64 / sample_size as f64;
            if ratio < self.low_cardinality_ratio {
                Cardinality::Low
            } else {
                Cardinality::High
            }
        };

        let semantic_type = match hint.and_then(|h| h.declared_type) {
            Some(declared) => declared,
            None if stats.non_null_count == 0 => SemanticType::Nominal,
            None if stats.all_numeric => SemanticType::Quantitative,
            None if stats.all_temporal => SemanticType::Temporal,
            None => SemanticType::Nominal,
        };

        Column {
            name: name.to_string(),
            semantic_type,
            nullable: stats.null_count > 0,
            cardinality,
            title: hint.and_then(|h| h.label.clone()),
        }
    }
}

impl Default for SchemaInferencer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dx_core::record;

    fn single_column(values: &[&str]) -> Vec<Record> {
        values
            .iter()
            .map(|v| record([("c", Value::from(*v))]))
            .collect()
    }

    fn infer_one(values: &[&str]) -> Column {
        let schema = SchemaInferencer::new().infer(&single_column(values), &[]);
        schema.column("c").unwrap().clone()
    }

    #[test]
    fn test_numeric_strings_are_quantitative() {
        assert_eq!(infer_one(&["1", "2", "3"]).semantic_type, SemanticType::Quantitative);
    }

    #[test]
    fn test_dates_are_temporal() {
        let column = infer_one(&["2023-01-01", "2023-02-01"]);
        assert_eq!(column.semantic_type, SemanticType::Temporal);
    }

    #[test]
    fn test_repeated_strings_are_nominal() {
        let column = infer_one(&["red", "blue", "red", "green"]);
        assert_eq!(column.semantic_type, SemanticType::Nominal);
        // 3 distinct / 4 values is above the 0.5 threshold
        assert_eq!(column.cardinality, Cardinality::High);

        let column = infer_one(&["a", "a", "a", "b", "b", "a"]);
        assert_eq!(column.cardinality, Cardinality::Low);
    }

    #[test]
    fn test_cardinality_ratio_counts_null_rows() {
        // 4 distinct over 10 sampled rows; over the 4 non-null cells alone it would be 1.0
        let column = infer_one(&["ash", "", "birch", "", "", "cedar", "", "", "elm", ""]);
        assert!(column.nullable);
        assert_eq!(column.cardinality, Cardinality::Low);

        let column = infer_one(&["ash", "birch", "", "cedar"]);
        assert_eq!(column.cardinality, Cardinality::High);
    }

    #[test]
    fn test_nulls_are_excluded_from_voting() {
        let column = infer_one(&["1", "", "N/A", "4"]);
        assert_eq!(column.semantic_type, SemanticType::Quantitative);
        assert!(column.nullable);

        let all_null = infer_one(&["", "null"]);
        assert_eq!(all_null.semantic_type, SemanticType::Nominal);
        assert!(all_null.nullable);
    }

    #[test]
    fn test_hint_overrides_inference() {
        let hints = vec![ColumnMetadata::new("c")
            .with_type(SemanticType::Ordinal)
            .with_label("Rank")];
        let schema = SchemaInferencer::new().infer(&single_column(&["1", "2", "3"]), &hints);
        let column = schema.column("c").unwrap();
        assert_eq!(column.semantic_type, SemanticType::Ordinal);
        assert_eq!(column.title.as_deref(), Some("Rank"));
    }

    #[test]
    fn test_column_order_and_exclusion() {
        let sample = vec![
            record([
                ("_id", Value::from(1.0)),
                ("b", Value::from("x")),
                ("a", Value::from(2.0)),
            ]),
            record([("c", Value::from("late"))]),
        ];
        let hints = vec![ColumnMetadata::new("a")];
        let schema = SchemaInferencer::new().infer(&sample, &hints);
        assert_eq!(schema.names().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        // missing cells in later records count as nulls
        assert!(schema.column("b").unwrap().nullable);
    }

    #[test]
    fn test_inference_is_deterministic() {
        let sample = single_column(&["x", "y", "x", "2023-01-01", "7"]);
        let inferencer = SchemaInferencer::new();
        let first = inferencer.infer(&sample, &[]);
        for _ in 0..5 {
            assert_eq!(inferencer.infer(&sample, &[]), first);
        }
    }

    #[test]
    fn test_empty_sample() {
        let inferencer = SchemaInferencer::new();
        assert!(inferencer.infer(&[], &[]).is_empty());
        assert!(matches!(
            inferencer.infer_checked("res", &[], &[]),
            Err(AdapterError::EmptyResource(id)) if id == "res"
        ));
    }
}

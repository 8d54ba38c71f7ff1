//! Visualization-oriented column schema

use serde::{Deserialize, Serialize};

/// Role a column plays when encoded in a chart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    Quantitative,
    Ordinal,
    Nominal,
    Temporal,
}

impl SemanticType {
    /// Whether the visualization layer treats the column as a measure
    pub fn is_measure(&self) -> bool {
        matches!(self, SemanticType::Quantitative)
    }
}

/// Coarse distinct-value hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    Low,
    High,
}

/// A single inferred column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub semantic_type: SemanticType,
    pub nullable: bool,
    pub cardinality: Cardinality,
    /// Display label supplied by the store, if any
    pub title: Option<String>,
}

impl Column {
    pub fn new(name: impl Into<String>, semantic_type: SemanticType) -> Self {
        Self {
            name: name.into(),
            semantic_type,
            nullable: false,
            cardinality: Cardinality::Low,
            title: None,
        }
    }

    /// Label to show in the UI, falling back to the column name
    pub fn display_name(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }
}

/// Ordered set of columns with unique names
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    /// Build a schema, keeping the first column for any repeated name
    pub fn new(columns: Vec<Column>) -> Self {
        let mut seen = ahash::AHashSet::new();
        let columns = columns
            .into_iter()
            .filter(|c| seen.insert(c.name.clone()))
            .collect();
        Self { columns }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Explicit column information reported by a backing store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    /// Authoritative semantic type, overriding inference
    pub declared_type: Option<SemanticType>,
    /// Human-readable label
    pub label: Option<String>,
}

impl ColumnMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, semantic_type: SemanticType) -> Self {
        self.declared_type = Some(semantic_type);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_names_are_dropped() {
        let schema = Schema::new(vec![
            Column::new("a", SemanticType::Nominal),
            Column::new("b", SemanticType::Quantitative),
            Column::new("a", SemanticType::Temporal),
        ]);
        assert_eq!(schema.len(), 2);
        assert_eq!(schema.column("a").unwrap().semantic_type, SemanticType::Nominal);
        assert_eq!(schema.names().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_display_name_prefers_title() {
        let mut column = Column::new("pop_2020", SemanticType::Quantitative);
        assert_eq!(column.display_name(), "pop_2020");
        column.title = Some("Population (2020)".into());
        assert_eq!(column.display_name(), "Population (2020)");
    }
}

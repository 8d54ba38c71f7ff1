//! Filter and sort clauses, plus their in-process evaluation
//!
//! Stores that support pushdown translate these clauses into their own query
//! language. Stores that don't get them evaluated here, over fetched windows.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::value::Value;
use crate::window::Record;

/// Comparison operator of a filter clause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Contains,
    In,
    IsNull,
    NotNull,
}

/// Right-hand side of a filter clause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Many(Vec<Value>),
    Single(Value),
}

impl Default for FilterValue {
    fn default() -> Self {
        FilterValue::Single(Value::Null)
    }
}

impl FilterValue {
    /// Values to test against, in declaration order
    pub fn values(&self) -> &[Value] {
        match self {
            FilterValue::Many(values) => values,
            FilterValue::Single(value) => std::slice::from_ref(value),
        }
    }
}

impl From<Value> for FilterValue {
    fn from(value: Value) -> Self {
        FilterValue::Single(value)
    }
}

/// `{field, op, value}` as sent by the visualization layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterClause {
    pub field: String,
    pub op: FilterOp,
    #[serde(default)]
    pub value: FilterValue,
}

impl FilterClause {
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: FilterValue::Single(value.into()),
        }
    }

    pub fn one_of(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::In,
            value: FilterValue::Many(values),
        }
    }

    /// Evaluate the clause against a record; missing fields read as null
    pub fn matches(&self, record: &Record) -> bool {
        let cell = record.get(&self.field).unwrap_or(&Value::Null);
        match self.op {
            FilterOp::IsNull => cell.is_null(),
            FilterOp::NotNull => !cell.is_null(),
            FilterOp::In => self
                .value
                .values()
                .iter()
                .any(|v| cell.compare(v) == Some(Ordering::Equal)),
            FilterOp::Contains => {
                let needle = self.first_value();
                if cell.is_null() || needle.is_null() {
                    return false;
                }
                cell.to_text()
                    .to_lowercase()
                    .contains(&needle.to_text().to_lowercase())
            }
            op => {
                let ordering = cell.compare(self.first_value());
                match (op, ordering) {
                    (_, None) => false,
                    (FilterOp::Eq, Some(o)) => o == Ordering::Equal,
                    (FilterOp::Neq, Some(o)) => o != Ordering::Equal,
                    (FilterOp::Lt, Some(o)) => o == Ordering::Less,
                    (FilterOp::Lte, Some(o)) => o != Ordering::Greater,
                    (FilterOp::Gt, Some(o)) => o == Ordering::Greater,
                    (FilterOp::Gte, Some(o)) => o != Ordering::Less,
                    _ => false,
                }
            }
        }
    }

    fn first_value(&self) -> &Value {
        self.value.values().first().unwrap_or(&Value::Null)
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    #[serde(alias = "ascending")]
    Asc,
    #[serde(alias = "descending")]
    Desc,
}

/// `{field, direction}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// What a store can evaluate on its side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Pushdown {
    pub filter: bool,
    pub sort: bool,
}

impl Pushdown {
    pub const NONE: Pushdown = Pushdown { filter: false, sort: false };
    pub const FULL: Pushdown = Pushdown { filter: true, sort: true };
}

/// True when the record satisfies every clause
pub fn matches_all(filter: &[FilterClause], record: &Record) -> bool {
    filter.iter().all(|clause| clause.matches(record))
}

/// Compare two records by a sort spec. Nulls sort last in both directions.
pub fn compare_records(sort: &[SortKey], a: &Record, b: &Record) -> Ordering {
    for key in sort {
        let left = a.get(&key.field).unwrap_or(&Value::Null);
        let right = b.get(&key.field).unwrap_or(&Value::Null);
        let ordering = match (left.is_null(), right.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => match key.direction {
                SortDirection::Asc => left.sort_cmp(right),
                SortDirection::Desc => right.sort_cmp(left),
            },
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

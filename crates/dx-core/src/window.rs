//! Records and bounded row windows

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// One row, keyed by column name in source order
pub type Record = IndexMap<String, Value>;

/// Build a record from `(name, value)` pairs
pub fn record<K, I>(pairs: I) -> Record
where
    K: Into<String>,
    I: IntoIterator<Item = (K, Value)>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// A bounded slice of a resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowWindow {
    /// Rows in store (or requested sort) order
    pub rows: Vec<Record>,
    /// Logical offset of the first row
    pub offset: usize,
    /// Whether `total_count` is populated
    pub total_known: bool,
    /// Unfiltered row count of the resource
    pub total_count: Option<usize>,
    /// Row count under the active filter, when it could be determined
    pub filtered_count: Option<usize>,
    /// Whether rows may exist past this window
    pub has_more: bool,
}

impl RowWindow {
    /// Window with no rows at `offset`
    pub fn empty(offset: usize, total_count: Option<usize>) -> Self {
        Self {
            rows: Vec::new(),
            offset,
            total_known: total_count.is_some(),
            total_count,
            filtered_count: None,
            has_more: false,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Offset right after the last row of this window
    pub fn next_offset(&self) -> usize {
        self.offset + self.rows.len()
    }
}

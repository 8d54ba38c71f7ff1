//! Core data model for the data explorer adapter
//!
//! This crate defines the tagged values, schemas and row windows the adapter
//! produces, and the abstract store interface it reads from.

pub mod events;
pub mod query;
pub mod schema;
pub mod store;
pub mod value;
pub mod window;

// Re-export commonly used types
pub use events::{EventBus, Event};
pub use query::{FilterClause, FilterOp, FilterValue, Pushdown, SortDirection, SortKey};
pub use schema::{Cardinality, Column, ColumnMetadata, Schema, SemanticType};
pub use store::{ResolvedResource, ResourceDescriptor, ResourceResolver, StoreError, TabularStore};
pub use value::Value;
pub use window::{record, Record, RowWindow};

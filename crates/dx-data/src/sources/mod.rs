pub mod arrow_source;
pub mod csv_source;
pub mod memory_source;
pub mod sqlite_source;

pub use arrow_source::{metadata_from_schema, records_from_batch};
pub use csv_source::CsvStore;
pub use memory_source::{FetchStats, MemoryStore};
pub use sqlite_source::SqliteStore;

//! Schema and data comparison between two database snapshots

pub mod data_diff;
pub mod export;
pub mod inspector;
pub mod runner;
pub mod schema_diff;
pub mod types;

pub use data_diff::{DataDiffOptions, compare_rows};
pub use export::{DiffExporter, DiffRecord, ExportError};
pub use runner::Comparator;
pub use schema_diff::{SchemaDiffStats, compare_schemas};
pub use types::*;

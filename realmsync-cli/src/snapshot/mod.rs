//! Database snapshots consumed by the comparison engine
//!
//! A snapshot exposes its schema catalog and a primary-key ordered row
//! stream per table. Snapshots are looked up by name through an explicit
//! [`DatabaseRegistry`] owned by the workspace session that opened them.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::compare::{DataRow, ObjectCategory, ObjectId};

pub use memory::MemorySnapshot;
pub use sqlite::SqliteSnapshot;

/// Errors raised while reading from a snapshot
#[derive(Debug, Clone, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot '{snapshot}' unreachable: {message}")]
    Unreachable { snapshot: String, message: String },

    #[error("{object} not found in snapshot '{snapshot}'")]
    NotFound { snapshot: String, object: String },

    #[error("query failed: {0}")]
    Query(String),

    #[error("rows of table '{table}' are not ordered by primary key")]
    Unordered { table: String },
}

impl SnapshotError {
    /// Whether retrying the read may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, SnapshotError::Unreachable { .. })
    }
}

impl crate::resilience::RetryableError for SnapshotError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

/// A column as reported by the catalog, before normalization
#[derive(Debug, Clone, PartialEq)]
pub struct RawColumn {
    pub name: String,
    pub data_type: String,
    pub not_null: bool,
    pub default: Option<String>,
    /// 1-based position in the primary key, 0 when not part of it
    pub primary_key: u32,
}

impl RawColumn {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            not_null: false,
            default: None,
            primary_key: 0,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn primary_key(mut self, position: u32) -> Self {
        self.primary_key = position;
        self
    }

    pub fn default_value(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// A foreign-key reference as reported by the catalog
#[derive(Debug, Clone, PartialEq)]
pub struct RawReference {
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
    pub on_update: String,
    pub on_delete: String,
}

impl RawReference {
    pub fn new(from_column: impl Into<String>, to_table: impl Into<String>, to_column: impl Into<String>) -> Self {
        Self {
            from_column: from_column.into(),
            to_table: to_table.into(),
            to_column: to_column.into(),
            on_update: "NO ACTION".to_string(),
            on_delete: "NO ACTION".to_string(),
        }
    }

    pub fn on_delete(mut self, action: impl Into<String>) -> Self {
        self.on_delete = action.into();
        self
    }
}

/// Catalog entry for one schema object
#[derive(Debug, Clone, PartialEq)]
pub struct RawSchemaObject {
    pub id: ObjectId,
    /// Table the object belongs to (indexes, triggers, constraints)
    pub owner: Option<String>,
    pub sql: Option<String>,
    pub columns: Vec<RawColumn>,
    pub references: Vec<RawReference>,
    /// Column lists of UNIQUE constraints (tables)
    pub unique_keys: Vec<Vec<String>>,
}

impl RawSchemaObject {
    pub fn new(id: ObjectId) -> Self {
        Self {
            id,
            owner: None,
            sql: None,
            columns: Vec::new(),
            references: Vec::new(),
            unique_keys: Vec::new(),
        }
    }

    pub fn table(name: impl Into<String>, columns: Vec<RawColumn>) -> Self {
        Self {
            columns,
            ..Self::new(ObjectId::new(ObjectCategory::Table, name))
        }
    }

    pub fn with_sql(id: ObjectId, sql: impl Into<String>) -> Self {
        Self {
            sql: Some(sql.into()),
            ..Self::new(id)
        }
    }

    pub fn owned_by(mut self, table: impl Into<String>) -> Self {
        self.owner = Some(table.into());
        self
    }

    pub fn with_unique(mut self, columns: &[&str]) -> Self {
        self.unique_keys.push(columns.iter().map(|c| c.to_string()).collect());
        self
    }
}

/// Read-only view of one named database
#[async_trait]
pub trait Snapshot: Send + Sync {
    fn name(&self) -> &str;

    /// Number of live connections this snapshot can serve concurrently
    fn max_connections(&self) -> usize {
        1
    }

    async fn list_objects(&self) -> Result<Vec<ObjectId>, SnapshotError>;

    async fn fetch_object(&self, id: &ObjectId) -> Result<RawSchemaObject, SnapshotError>;

    /// Rows of `table` in ascending primary-key order
    fn table_rows<'a>(&'a self, table: &'a str) -> BoxStream<'a, Result<DataRow, SnapshotError>>;

    async fn table_names(&self) -> Result<Vec<String>, SnapshotError> {
        Ok(self
            .list_objects()
            .await?
            .into_iter()
            .filter(|id| id.category == ObjectCategory::Table)
            .map(|id| id.name)
            .collect())
    }
}

/// Named snapshots available to a workspace session
#[derive(Default, Clone)]
pub struct DatabaseRegistry {
    databases: BTreeMap<String, Arc<dyn Snapshot>>,
}

impl DatabaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a snapshot under its own name, replacing any previous one
    pub fn register(&mut self, snapshot: Arc<dyn Snapshot>) {
        let name = snapshot.name().to_string();
        if self.databases.insert(name.clone(), snapshot).is_some() {
            log::debug!("Replaced database '{}' in registry", name);
        }
    }

    pub fn get_database(&self, name: &str) -> Option<Arc<dyn Snapshot>> {
        self.databases.get(name).cloned()
    }

    /// All registered names in sorted order
    pub fn get_all_database_names(&self) -> Vec<String> {
        self.databases.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.databases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.databases.is_empty()
    }
}

impl std::fmt::Debug for DatabaseRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseRegistry")
            .field("databases", &self.get_all_database_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup_by_name() {
        let mut registry = DatabaseRegistry::new();
        registry.register(Arc::new(MemorySnapshot::new("prod")));
        registry.register(Arc::new(MemorySnapshot::new("dev")));

        assert_eq!(registry.get_all_database_names(), vec!["dev", "prod"]);
        assert_eq!(registry.get_database("dev").map(|s| s.name().to_string()), Some("dev".to_string()));
        assert!(registry.get_database("staging").is_none());
    }

    #[test]
    fn test_only_unreachable_is_transient() {
        let unreachable = SnapshotError::Unreachable {
            snapshot: "prod".into(),
            message: "timeout".into(),
        };
        assert!(unreachable.is_transient());
        assert!(!SnapshotError::Query("syntax".into()).is_transient());
    }
}

//! In-memory snapshot, used for fixtures and previews

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::BTreeMap;

use super::{RawSchemaObject, Snapshot, SnapshotError};
use crate::compare::{DataRow, ObjectId};

/// Snapshot holding its catalog and rows in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshot {
    name: String,
    objects: BTreeMap<ObjectId, RawSchemaObject>,
    /// Rows per table, kept sorted by primary key
    tables: BTreeMap<String, Vec<DataRow>>,
}

impl MemorySnapshot {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_object(mut self, object: RawSchemaObject) -> Self {
        self.add_object(object);
        self
    }

    pub fn add_object(&mut self, object: RawSchemaObject) {
        self.objects.insert(object.id.clone(), object);
    }

    /// Set the rows of a table; order of `rows` does not matter
    pub fn with_rows(mut self, table: impl Into<String>, mut rows: Vec<DataRow>) -> Self {
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        self.tables.insert(table.into(), rows);
        self
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables.get(table).map(|rows| rows.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Snapshot for MemorySnapshot {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_connections(&self) -> usize {
        8
    }

    async fn list_objects(&self) -> Result<Vec<ObjectId>, SnapshotError> {
        Ok(self.objects.keys().cloned().collect())
    }

    async fn fetch_object(&self, id: &ObjectId) -> Result<RawSchemaObject, SnapshotError> {
        self.objects
            .get(id)
            .cloned()
            .ok_or_else(|| SnapshotError::NotFound {
                snapshot: self.name.clone(),
                object: id.to_string(),
            })
    }

    fn table_rows<'a>(&'a self, table: &'a str) -> BoxStream<'a, Result<DataRow, SnapshotError>> {
        match self.tables.get(table) {
            Some(rows) => stream::iter(rows.iter().cloned().map(Ok)).boxed(),
            None if self.objects.contains_key(&ObjectId::table(table)) => stream::empty().boxed(),
            None => stream::once(async move {
                Err(SnapshotError::NotFound {
                    snapshot: self.name.clone(),
                    object: format!("table {}", table),
                })
            })
            .boxed(),
        }
    }
}

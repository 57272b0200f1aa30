//! SQLite promotion target
//!
//! Executes generated statements through a pooled connection and reads
//! the target's existing identities into a [`TargetIndex`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqlitePool};
use sqlx::query::Query;

use super::executor::{TargetDatabase, TargetTransaction};
use super::id_mapper::{TargetIndex, TargetRecord};
use super::types::SqlStatement;
use crate::config::TableLayout;
use crate::snapshot::sqlite::decode_row;
use crate::types::{EntityKey, Value, quote_ident};

#[derive(Debug, Clone)]
pub struct SqliteTarget {
    name: String,
    pool: SqlitePool,
}

impl SqliteTarget {
    pub fn new(name: impl Into<String>, pool: SqlitePool) -> Self {
        Self {
            name: name.into(),
            pool,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl TargetDatabase for SqliteTarget {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load_index(&self, layout: &TableLayout) -> Result<TargetIndex> {
        load_target_index(&self.pool, layout)
            .await
            .with_context(|| format!("Failed to index target '{}'", self.name))
    }

    async fn begin(&self) -> Result<Box<dyn TargetTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .with_context(|| format!("Failed to begin transaction on '{}'", self.name))?;
        Ok(Box::new(SqliteTransaction { tx }))
    }
}

struct SqliteTransaction {
    tx: sqlx::Transaction<'static, Sqlite>,
}

#[async_trait]
impl TargetTransaction for SqliteTransaction {
    async fn execute(&mut self, statement: &SqlStatement) -> Result<u64> {
        let (sql, values) = statement.to_parameterized();
        let mut query = sqlx::query(&sql);
        for value in values {
            query = bind_value(query, value);
        }
        let result = query
            .execute(&mut *self.tx)
            .await
            .with_context(|| format!("{} on {} failed", statement.verb.label(), statement.table))?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let SqliteTransaction { tx } = *self;
        tx.commit().await.context("Commit failed")
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let SqliteTransaction { tx } = *self;
        tx.rollback().await.context("Rollback failed")
    }
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<i64>),
        Value::Bool(b) => query.bind(b),
        Value::Int(i) => query.bind(i),
        Value::Float(f) => query.bind(f),
        Value::Text(s) => query.bind(s),
        Value::Blob(bytes) => query.bind(bytes),
    }
}

/// Read existing rows and max ids for every entity type in `layout`
///
/// Tables missing from the target are skipped: every entity of that type
/// will be allocated from 1.
pub async fn load_target_index(pool: &SqlitePool, layout: &TableLayout) -> Result<TargetIndex> {
    let mut index = TargetIndex::new();

    for (entity_type, spec) in layout.iter() {
        let exists: Option<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(&spec.table)
                .fetch_optional(pool)
                .await
                .with_context(|| format!("Failed to look up table {}", spec.table))?;
        if exists.is_none() {
            log::debug!("Target has no table '{}', skipping {}", spec.table, entity_type);
            continue;
        }

        let rows = sqlx::query(&format!("SELECT * FROM {}", quote_ident(&spec.table)))
            .fetch_all(pool)
            .await
            .with_context(|| format!("Failed to read {}", spec.table))?;

        let mut loaded = 0usize;
        for row in &rows {
            let mut fields = decode_row(row).with_context(|| format!("Failed to decode a row of {}", spec.table))?;
            let id = fields.remove(&spec.id_column).and_then(|v| v.as_int());
            let natural_key = fields
                .remove(&spec.natural_key_column)
                .and_then(|v| v.as_str().map(str::to_string));
            let (Some(id), Some(natural_key)) = (id, natural_key) else {
                log::warn!("Row of {} without usable id or natural key, ignored", spec.table);
                continue;
            };
            index.insert(EntityKey::new(entity_type, natural_key), TargetRecord { id, fields });
            loaded += 1;
        }

        let (max_id,): (Option<i64>,) = sqlx::query_as(&format!(
            "SELECT MAX({}) FROM {}",
            quote_ident(&spec.id_column),
            quote_ident(&spec.table)
        ))
        .fetch_one(pool)
        .await
        .with_context(|| format!("Failed to read max id of {}", spec.table))?;

        if let Some(max_id) = max_id {
            index.set_max_id(entity_type, max_id);
        }

        log::debug!(
            "Indexed {} {} rows (max id {})",
            loaded,
            spec.table,
            max_id.map(|m| m.to_string()).unwrap_or_else(|| "none".into())
        );
    }

    log::info!("Target index holds {} existing entities", index.len());
    Ok(index)
}

//! SQLite-backed snapshot
//!
//! Reads the catalog from `sqlite_master` and the table-valued pragmas,
//! and streams table rows page by page in primary-key order so large
//! tables are never loaded whole.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::collections::{BTreeMap, VecDeque};

use super::{RawColumn, RawReference, RawSchemaObject, Snapshot, SnapshotError};
use crate::compare::{DataRow, ObjectCategory, ObjectId};
use crate::types::{RowKey, Value, quote_ident};

/// Rows fetched per page when streaming a table
const PAGE_SIZE: i64 = 500;

/// Alias under which the implicit rowid is selected for tables without a primary key
const ROWID_ALIAS: &str = "__realmsync_rowid";

/// Snapshot over a live SQLite database
#[derive(Debug, Clone)]
pub struct SqliteSnapshot {
    name: String,
    pool: SqlitePool,
}

impl SqliteSnapshot {
    /// Open a pool against `url` (e.g. `sqlite://content.db`)
    pub async fn connect(name: impl Into<String>, url: &str, max_connections: u32) -> Result<Self> {
        let name = name.into();
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(url)
            .await
            .with_context(|| format!("Failed to open database '{}' at {}", name, url))?;
        log::info!("Opened database '{}' ({} connections)", name, max_connections);
        Ok(Self { name, pool })
    }

    pub fn from_pool(name: impl Into<String>, pool: SqlitePool) -> Self {
        Self {
            name: name.into(),
            pool,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn map_err(&self, err: sqlx::Error) -> SnapshotError {
        match err {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                SnapshotError::Unreachable {
                    snapshot: self.name.clone(),
                    message: err.to_string(),
                }
            }
            other => SnapshotError::Query(other.to_string()),
        }
    }

    async fn table_columns(&self, table: &str) -> Result<Vec<RawColumn>, SnapshotError> {
        let rows: Vec<(String, String, i64, Option<String>, i64)> = sqlx::query_as(
            r#"SELECT name, type, "notnull", dflt_value, pk FROM pragma_table_info(?) ORDER BY cid"#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| self.map_err(e))?;

        Ok(rows
            .into_iter()
            .map(|(name, data_type, not_null, default, pk)| RawColumn {
                name,
                data_type,
                not_null: not_null != 0,
                default,
                primary_key: pk.max(0) as u32,
            })
            .collect())
    }

    /// Foreign keys of a table, one constraint per referenced key
    async fn foreign_keys(&self, table: &str) -> Result<Vec<RawSchemaObject>, SnapshotError> {
        let rows: Vec<(i64, String, String, Option<String>, String, String)> = sqlx::query_as(
            r#"SELECT id, "table", "from", "to", on_update, on_delete
               FROM pragma_foreign_key_list(?) ORDER BY id, seq"#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| self.map_err(e))?;

        let mut grouped: BTreeMap<i64, Vec<RawReference>> = BTreeMap::new();
        for (id, to_table, from_column, to_column, on_update, on_delete) in rows {
            grouped.entry(id).or_default().push(RawReference {
                from_column,
                to_column: to_column.unwrap_or_default(),
                to_table,
                on_update,
                on_delete,
            });
        }

        Ok(grouped
            .into_values()
            .map(|references| {
                let columns: Vec<&str> = references.iter().map(|r| r.from_column.as_str()).collect();
                let name = format!("{}_{}_fkey", table, columns.join("_"));
                RawSchemaObject {
                    references,
                    ..RawSchemaObject::new(ObjectId::new(ObjectCategory::Constraint, name)).owned_by(table)
                }
            })
            .collect())
    }

    /// Column lists of the table's UNIQUE constraints
    ///
    /// These live in `sqlite_autoindex_*` indexes that the catalog listing
    /// skips, so they are read through `pragma_index_list` instead.
    async fn unique_keys(&self, table: &str) -> Result<Vec<Vec<String>>, SnapshotError> {
        let indexes: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM pragma_index_list(?) WHERE origin = 'u' ORDER BY name")
                .bind(table)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| self.map_err(e))?;

        let mut keys = Vec::with_capacity(indexes.len());
        for (index,) in indexes {
            let columns: Vec<(Option<String>,)> =
                sqlx::query_as("SELECT name FROM pragma_index_info(?) ORDER BY seqno")
                    .bind(&index)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| self.map_err(e))?;
            keys.push(columns.into_iter().filter_map(|(name,)| name).collect());
        }
        keys.sort();
        Ok(keys)
    }

    async fn primary_key_columns(&self, table: &str) -> Result<Vec<String>, SnapshotError> {
        let columns: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM pragma_table_info(?) WHERE pk > 0 ORDER BY pk")
                .bind(table)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| self.map_err(e))?;
        Ok(columns.into_iter().map(|(name,)| name).collect())
    }

    async fn fetch_page(&self, table: &str, page: &mut PageState) -> Result<(), SnapshotError> {
        if page.key_columns.is_none() {
            let columns = self.primary_key_columns(table).await?;
            page.key_columns = Some(columns);
        }
        let key_columns = page.key_columns.clone().unwrap_or_default();

        let (select, order) = if key_columns.is_empty() {
            (
                format!("rowid AS {}, *", quote_ident(ROWID_ALIAS)),
                "rowid".to_string(),
            )
        } else {
            // Byte order regardless of the declared collation
            let order: Vec<String> = key_columns
                .iter()
                .map(|c| format!("{} COLLATE BINARY", quote_ident(c)))
                .collect();
            ("*".to_string(), order.join(", "))
        };

        let sql = format!(
            "SELECT {} FROM {} ORDER BY {} LIMIT ? OFFSET ?",
            select,
            quote_ident(table),
            order
        );

        let rows = sqlx::query(&sql)
            .bind(PAGE_SIZE)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.map_err(e))?;

        log::debug!(
            "Fetched {} rows from '{}'.{} at offset {}",
            rows.len(),
            self.name,
            table,
            page.offset
        );

        if (rows.len() as i64) < PAGE_SIZE {
            page.done = true;
        }
        page.offset += rows.len() as i64;

        for row in rows {
            let mut columns = decode_row(&row).map_err(|e| self.map_err(e))?;
            let key = if key_columns.is_empty() {
                RowKey(vec![columns.remove(ROWID_ALIAS).unwrap_or_default()])
            } else {
                RowKey(
                    key_columns
                        .iter()
                        .map(|c| columns.get(c).cloned().unwrap_or_default())
                        .collect(),
                )
            };
            page.buffer.push_back(DataRow::new(key, columns));
        }

        Ok(())
    }
}

#[derive(Default)]
struct PageState {
    offset: i64,
    buffer: VecDeque<DataRow>,
    done: bool,
    key_columns: Option<Vec<String>>,
}

/// Decode every column of a row by its runtime storage class
pub(crate) fn decode_row(row: &SqliteRow) -> Result<BTreeMap<String, Value>, sqlx::Error> {
    let mut columns = BTreeMap::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(idx)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let type_name = raw.type_info().name().to_ascii_uppercase();
            match type_name.as_str() {
                "INTEGER" | "BOOLEAN" => Value::Int(row.try_get::<i64, _>(idx)?),
                "REAL" => Value::Float(row.try_get::<f64, _>(idx)?),
                "BLOB" => Value::Blob(row.try_get::<Vec<u8>, _>(idx)?),
                _ => Value::Text(row.try_get::<String, _>(idx)?),
            }
        };
        columns.insert(column.name().to_string(), value);
    }
    Ok(columns)
}

fn category_from_master(kind: &str) -> Option<ObjectCategory> {
    match kind {
        "table" => Some(ObjectCategory::Table),
        "view" => Some(ObjectCategory::View),
        "index" => Some(ObjectCategory::Index),
        "trigger" => Some(ObjectCategory::Trigger),
        _ => None,
    }
}

fn master_type(category: ObjectCategory) -> Option<&'static str> {
    match category {
        ObjectCategory::Table => Some("table"),
        ObjectCategory::View => Some("view"),
        ObjectCategory::Index => Some("index"),
        ObjectCategory::Trigger => Some("trigger"),
        ObjectCategory::Constraint | ObjectCategory::Function => None,
    }
}

#[async_trait]
impl Snapshot for SqliteSnapshot {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_connections(&self) -> usize {
        self.pool.options().get_max_connections() as usize
    }

    async fn list_objects(&self) -> Result<Vec<ObjectId>, SnapshotError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"SELECT type, name FROM sqlite_master
               WHERE name NOT LIKE 'sqlite\_%' ESCAPE '\'
               ORDER BY type, name"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| self.map_err(e))?;

        let mut objects = Vec::new();
        for (kind, name) in rows {
            let Some(category) = category_from_master(&kind) else {
                continue;
            };
            if category == ObjectCategory::Table {
                for constraint in self.foreign_keys(&name).await? {
                    objects.push(constraint.id);
                }
            }
            objects.push(ObjectId::new(category, name));
        }

        objects.sort();
        Ok(objects)
    }

    async fn fetch_object(&self, id: &ObjectId) -> Result<RawSchemaObject, SnapshotError> {
        let not_found = || SnapshotError::NotFound {
            snapshot: self.name.clone(),
            object: id.to_string(),
        };

        if id.category == ObjectCategory::Constraint {
            for table in self.table_names().await? {
                for constraint in self.foreign_keys(&table).await? {
                    if constraint.id == *id {
                        return Ok(constraint);
                    }
                }
            }
            return Err(not_found());
        }

        let kind = master_type(id.category).ok_or_else(not_found)?;
        let entry: Option<(Option<String>, String)> =
            sqlx::query_as("SELECT sql, tbl_name FROM sqlite_master WHERE type = ? AND name = ?")
                .bind(kind)
                .bind(&id.name)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| self.map_err(e))?;
        let (sql, owner) = entry.ok_or_else(not_found)?;

        let mut object = RawSchemaObject::new(id.clone());
        match id.category {
            ObjectCategory::Table => {
                object.columns = self.table_columns(&id.name).await?;
                object.unique_keys = self.unique_keys(&id.name).await?;
                object.sql = sql;
            }
            ObjectCategory::Index => {
                let columns: Vec<(Option<String>,)> =
                    sqlx::query_as("SELECT name FROM pragma_index_info(?) ORDER BY seqno")
                        .bind(&id.name)
                        .fetch_all(&self.pool)
                        .await
                        .map_err(|e| self.map_err(e))?;
                object.columns = columns
                    .into_iter()
                    .map(|(name,)| RawColumn::new(name.unwrap_or_else(|| "<expr>".to_string()), ""))
                    .collect();
                object.owner = Some(owner);
                object.sql = sql;
            }
            _ => {
                object.owner = Some(owner).filter(|o| *o != id.name);
                object.sql = sql;
            }
        }

        Ok(object)
    }

    fn table_rows<'a>(&'a self, table: &'a str) -> BoxStream<'a, Result<DataRow, SnapshotError>> {
        stream::unfold(PageState::default(), move |mut page| async move {
            loop {
                if let Some(row) = page.buffer.pop_front() {
                    return Some((Ok(row), page));
                }
                if page.done {
                    return None;
                }
                if let Err(err) = self.fetch_page(table, &mut page).await {
                    page.done = true;
                    page.buffer.clear();
                    return Some((Err(err), page));
                }
            }
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::{Comparator, DataDiffOptions, DiffStatus, inspector};
    use crate::resilience::ResilienceConfig;
    use futures::TryStreamExt;
    use std::sync::Arc;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    async fn seed(pool: &SqlitePool) {
        for sql in [
            "CREATE TABLE npcs (id INTEGER PRIMARY KEY, code TEXT NOT NULL, name TEXT)",
            "CREATE TABLE quests (id INTEGER PRIMARY KEY, code TEXT NOT NULL, giver_id INTEGER REFERENCES npcs(id))",
            "CREATE INDEX idx_npcs_code ON npcs(code)",
            "CREATE VIEW npc_names AS SELECT name FROM npcs",
            "INSERT INTO npcs (id, code, name) VALUES (2, 'smith', 'Smith'), (1, 'elder_oak', 'Elder Oak')",
        ] {
            sqlx::query(sql).execute(pool).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_list_objects_includes_foreign_keys() {
        let pool = memory_pool().await;
        seed(&pool).await;
        let snapshot = SqliteSnapshot::from_pool("dev", pool);

        let objects = snapshot.list_objects().await.unwrap();

        assert!(objects.contains(&ObjectId::table("npcs")));
        assert!(objects.contains(&ObjectId::new(ObjectCategory::Index, "idx_npcs_code")));
        assert!(objects.contains(&ObjectId::new(ObjectCategory::View, "npc_names")));
        assert!(objects.contains(&ObjectId::new(ObjectCategory::Constraint, "quests_giver_id_fkey")));
    }

    #[tokio::test]
    async fn test_fetch_table_columns() {
        let pool = memory_pool().await;
        seed(&pool).await;
        let snapshot = SqliteSnapshot::from_pool("dev", pool);

        let raw = snapshot.fetch_object(&ObjectId::table("npcs")).await.unwrap();
        let names: Vec<&str> = raw.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "code", "name"]);
        assert_eq!(raw.columns[0].primary_key, 1);
        assert!(raw.columns[1].not_null);

        let descriptor = inspector::describe(&raw);
        assert_eq!(descriptor.definition.len(), 3);
    }

    #[tokio::test]
    async fn test_rows_stream_in_key_order() {
        let pool = memory_pool().await;
        seed(&pool).await;
        let snapshot = SqliteSnapshot::from_pool("dev", pool);

        let rows: Vec<DataRow> = snapshot.table_rows("npcs").try_collect().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].key, RowKey::single(1));
        assert_eq!(rows[0].columns.get("code"), Some(&Value::Text("elder_oak".into())));
        assert_eq!(rows[1].key, RowKey::single(2));
    }

    async fn snapshot_with(name: &str, statements: &[&str]) -> SqliteSnapshot {
        let pool = memory_pool().await;
        for sql in statements {
            sqlx::query(sql).execute(&pool).await.unwrap();
        }
        SqliteSnapshot::from_pool(name, pool)
    }

    #[tokio::test]
    async fn test_unique_and_check_constraints_mark_table_modified() {
        let source = snapshot_with(
            "dev",
            &["CREATE TABLE npcs (id INTEGER PRIMARY KEY, code TEXT NOT NULL UNIQUE, level INTEGER CHECK (level > 0))"],
        )
        .await;
        let target = snapshot_with(
            "prod",
            &["CREATE TABLE npcs (id INTEGER PRIMARY KEY, code TEXT NOT NULL, level INTEGER)"],
        )
        .await;

        let comparator = Comparator::new(Arc::new(source), Arc::new(target), &ResilienceConfig::default());
        let entries = comparator.compare_schemas().await.unwrap();

        let npcs = entries.iter().find(|e| e.object.name == "npcs").unwrap();
        assert_eq!(npcs.status, DiffStatus::Modified);
        let items: Vec<&str> = npcs.changes.iter().map(|c| c.item.as_str()).collect();
        assert!(items.contains(&"@unique(code)"));
        assert!(items.contains(&"@check(level>0)"));
        assert!(!entries.iter().any(|e| e.object.name.starts_with("sqlite_autoindex")));
    }

    #[tokio::test]
    async fn test_foreign_key_actions_read_from_catalog() {
        let snapshot = snapshot_with(
            "dev",
            &[
                "CREATE TABLE npcs (id INTEGER PRIMARY KEY)",
                "CREATE TABLE quests (id INTEGER PRIMARY KEY, giver_id INTEGER REFERENCES npcs(id) ON DELETE CASCADE)",
            ],
        )
        .await;

        let raw = snapshot
            .fetch_object(&ObjectId::new(ObjectCategory::Constraint, "quests_giver_id_fkey"))
            .await
            .unwrap();
        assert_eq!(raw.references[0].on_delete, "CASCADE");
        assert_eq!(raw.references[0].on_update, "NO ACTION");
    }

    #[tokio::test]
    async fn test_collated_text_key_streams_in_byte_order() {
        let statements = [
            "CREATE TABLE skills (code TEXT PRIMARY KEY COLLATE NOCASE, power INTEGER)",
            "INSERT INTO skills (code, power) VALUES ('a_heal', 1), ('B_fire', 2)",
        ];
        let source = snapshot_with("dev", &statements).await;
        let target = snapshot_with("prod", &statements).await;

        let rows: Vec<DataRow> = source.table_rows("skills").try_collect().await.unwrap();
        let keys: Vec<RowKey> = rows.into_iter().map(|r| r.key).collect();
        assert_eq!(
            keys,
            vec![
                RowKey(vec![Value::Text("B_fire".into())]),
                RowKey(vec![Value::Text("a_heal".into())])
            ]
        );

        let comparator = Comparator::new(Arc::new(source), Arc::new(target), &ResilienceConfig::default());
        let result = comparator.compare_table_data("skills", DataDiffOptions::default()).await;
        assert_eq!(result.error, None);
        assert_eq!(result.status(), DiffStatus::Match);
        assert_eq!(result.matched, 2);
    }

    #[tokio::test]
    async fn test_rows_stream_across_page_boundaries() {
        let snapshot = snapshot_with("dev", &["CREATE TABLE drops (id INTEGER PRIMARY KEY, weight INTEGER)"]).await;
        let total = 2 * PAGE_SIZE + 1;
        // Inserted in descending order so key order differs from insertion order
        for id in (1..=total).rev() {
            sqlx::query("INSERT INTO drops (id, weight) VALUES (?, ?)")
                .bind(id)
                .bind(id % 7)
                .execute(snapshot.pool())
                .await
                .unwrap();
        }

        let rows: Vec<DataRow> = snapshot.table_rows("drops").try_collect().await.unwrap();
        assert_eq!(rows.len() as i64, total);
        let keys: Vec<RowKey> = rows.iter().map(|r| r.key.clone()).collect();
        let expected: Vec<RowKey> = (1..=total).map(RowKey::single).collect();
        assert_eq!(keys, expected);
    }

    #[tokio::test]
    async fn test_exactly_one_full_page() {
        let snapshot = snapshot_with("dev", &["CREATE TABLE drops (id INTEGER PRIMARY KEY)"]).await;
        for id in 1..=PAGE_SIZE {
            sqlx::query("INSERT INTO drops (id) VALUES (?)")
                .bind(id)
                .execute(snapshot.pool())
                .await
                .unwrap();
        }

        let rows: Vec<DataRow> = snapshot.table_rows("drops").try_collect().await.unwrap();
        assert_eq!(rows.len() as i64, PAGE_SIZE);
        assert_eq!(rows.last().map(|r| r.key.clone()), Some(RowKey::single(PAGE_SIZE)));
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let pool = memory_pool().await;
        let snapshot = SqliteSnapshot::from_pool("dev", pool);
        let err = snapshot
            .fetch_object(&ObjectId::table("ghosts"))
            .await
            .unwrap_err();
        assert!(matches!(err, SnapshotError::NotFound { .. }));
    }
}

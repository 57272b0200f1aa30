//! Row-level comparison of one table across two snapshots
//!
//! Both sides are consumed as primary-key ordered streams and merged in a
//! single pass, so memory use does not grow with table size in
//! counts-only mode.

use futures::{Stream, TryStreamExt};
use std::cmp::Ordering;
use std::collections::BTreeSet;

use super::types::{DataComparisonResult, DataRow, DataRowDiff, DiffStatus};
use crate::snapshot::SnapshotError;
use crate::types::RowKey;

/// Options controlling how much detail a data comparison keeps
#[derive(Debug, Clone, Copy, Default)]
pub struct DataDiffOptions {
    /// Only aggregate counts, do not keep per-row diffs
    pub counts_only: bool,
}

/// Pulls rows from an ordered stream, verifying ascending key order
struct OrderedRows<S> {
    rows: S,
    table: String,
    last_key: Option<RowKey>,
}

impl<S> OrderedRows<S>
where
    S: Stream<Item = Result<DataRow, SnapshotError>> + Unpin,
{
    fn new(rows: S, table: &str) -> Self {
        Self {
            rows,
            table: table.to_string(),
            last_key: None,
        }
    }

    async fn next(&mut self) -> Result<Option<DataRow>, SnapshotError> {
        let Some(row) = self.rows.try_next().await? else {
            return Ok(None);
        };
        if let Some(last) = &self.last_key {
            if row.key <= *last {
                return Err(SnapshotError::Unordered {
                    table: self.table.clone(),
                });
            }
        }
        self.last_key = Some(row.key.clone());
        Ok(Some(row))
    }
}

/// Merge two primary-key ordered row streams into a comparison result
pub async fn compare_rows<S, T>(
    table: &str,
    source: S,
    target: T,
    options: DataDiffOptions,
) -> Result<DataComparisonResult, SnapshotError>
where
    S: Stream<Item = Result<DataRow, SnapshotError>> + Unpin,
    T: Stream<Item = Result<DataRow, SnapshotError>> + Unpin,
{
    let mut source = OrderedRows::new(source, table);
    let mut target = OrderedRows::new(target, table);
    let mut result = DataComparisonResult::new(table);

    let mut next_source = source.next().await?;
    let mut next_target = target.next().await?;

    loop {
        let order = match (&next_source, &next_target) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(s), Some(t)) => s.key.cmp(&t.key),
        };

        match order {
            Ordering::Less => {
                if let Some(row) = next_source.take() {
                    result.source_count += 1;
                    result.added += 1;
                    record(&mut result, options, row.key, DiffStatus::Added, Vec::new());
                }
                next_source = source.next().await?;
            }
            Ordering::Greater => {
                if let Some(row) = next_target.take() {
                    result.target_count += 1;
                    result.removed += 1;
                    record(&mut result, options, row.key, DiffStatus::Removed, Vec::new());
                }
                next_target = target.next().await?;
            }
            Ordering::Equal => {
                if let (Some(s), Some(t)) = (next_source.take(), next_target.take()) {
                    result.source_count += 1;
                    result.target_count += 1;
                    if s.checksum == t.checksum {
                        result.matched += 1;
                        record(&mut result, options, s.key, DiffStatus::Match, Vec::new());
                    } else {
                        let changed = changed_columns(&s, &t);
                        if changed.is_empty() {
                            // Checksums differ only by numeric representation
                            result.matched += 1;
                            record(&mut result, options, s.key, DiffStatus::Match, Vec::new());
                        } else {
                            result.modified += 1;
                            record(&mut result, options, s.key, DiffStatus::Modified, changed);
                        }
                    }
                }
                next_source = source.next().await?;
                next_target = target.next().await?;
            }
        }
    }

    log::debug!(
        "Compared table '{}': {} source rows, {} target rows, +{} -{} ~{}",
        table,
        result.source_count,
        result.target_count,
        result.added,
        result.removed,
        result.modified
    );

    Ok(result)
}

fn record(
    result: &mut DataComparisonResult,
    options: DataDiffOptions,
    key: RowKey,
    status: DiffStatus,
    changed_columns: Vec<String>,
) {
    if !options.counts_only {
        result.rows.push(DataRowDiff {
            key,
            status,
            changed_columns,
        });
    }
}

/// Columns whose values differ between two versions of a row
pub fn changed_columns(source: &DataRow, target: &DataRow) -> Vec<String> {
    let names: BTreeSet<&String> = source.columns.keys().chain(target.columns.keys()).collect();
    names
        .into_iter()
        .filter(|name| match (source.columns.get(*name), target.columns.get(*name)) {
            (Some(a), Some(b)) => !a.same_as(b),
            _ => true,
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;
    use futures::stream::{self, BoxStream, StreamExt};
    use std::collections::BTreeMap;

    fn row(id: i64, cols: &[(&str, Value)]) -> DataRow {
        let mut columns: BTreeMap<String, Value> =
            cols.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        columns.insert("id".to_string(), Value::Int(id));
        DataRow::new(RowKey::single(id), columns)
    }

    fn rows(items: Vec<DataRow>) -> BoxStream<'static, Result<DataRow, SnapshotError>> {
        stream::iter(items.into_iter().map(Ok)).boxed()
    }

    fn monster_resources() -> Vec<DataRow> {
        (1..=5)
            .map(|i| {
                row(
                    i,
                    &[
                        ("sprite", Value::Text(format!("monster_{}.png", i))),
                        ("scale", Value::Float(1.0)),
                    ],
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_identical_table_reports_no_differences() {
        let result = compare_rows(
            "monster_resources",
            rows(monster_resources()),
            rows(monster_resources()),
            DataDiffOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(result.added, 0);
        assert_eq!(result.removed, 0);
        assert_eq!(result.modified, 0);
        assert_eq!(result.source_count, result.target_count);
        assert_eq!(result.matched, 5);
        assert_eq!(result.status(), DiffStatus::Match);
    }

    #[tokio::test]
    async fn test_added_removed_modified_rows() {
        let source = vec![
            row(1, &[("name", "Slime".into())]),
            row(2, &[("name", "Goblin".into()), ("hp", Value::Int(30))]),
            row(4, &[("name", "Dragon".into())]),
        ];
        let target = vec![
            row(1, &[("name", "Slime".into())]),
            row(2, &[("name", "Goblin".into()), ("hp", Value::Int(25))]),
            row(3, &[("name", "Bat".into())]),
        ];

        let result = compare_rows("monsters", rows(source), rows(target), DataDiffOptions::default())
            .await
            .unwrap();

        assert_eq!((result.matched, result.added, result.removed, result.modified), (1, 1, 1, 1));
        let modified = result.rows.iter().find(|r| r.status == DiffStatus::Modified).unwrap();
        assert_eq!(modified.key, RowKey::single(2));
        assert_eq!(modified.changed_columns, vec!["hp".to_string()]);
        let added = result.rows.iter().find(|r| r.status == DiffStatus::Added).unwrap();
        assert_eq!(added.key, RowKey::single(4));
        let removed = result.rows.iter().find(|r| r.status == DiffStatus::Removed).unwrap();
        assert_eq!(removed.key, RowKey::single(3));
    }

    #[tokio::test]
    async fn test_counts_only_keeps_no_rows() {
        let result = compare_rows(
            "monster_resources",
            rows(monster_resources()),
            rows(vec![]),
            DataDiffOptions { counts_only: true },
        )
        .await
        .unwrap();

        assert!(result.rows.is_empty());
        assert_eq!(result.added, 5);
        assert_eq!(result.target_count, 0);
    }

    #[tokio::test]
    async fn test_composite_keys() {
        let make = |quest: i64, step: &str, text: &str| {
            let mut columns = BTreeMap::new();
            columns.insert("quest_id".to_string(), Value::Int(quest));
            columns.insert("step".to_string(), Value::Text(step.to_string()));
            columns.insert("text".to_string(), Value::Text(text.to_string()));
            DataRow::new(RowKey(vec![Value::Int(quest), Value::Text(step.to_string())]), columns)
        };

        let source = vec![make(1, "a", "Go north"), make(1, "b", "Fight"), make(2, "a", "Talk")];
        let target = vec![make(1, "a", "Go north"), make(1, "b", "Flee"), make(2, "a", "Talk")];

        let result = compare_rows("quest_steps", rows(source), rows(target), DataDiffOptions::default())
            .await
            .unwrap();

        assert_eq!(result.matched, 2);
        assert_eq!(result.modified, 1);
        assert_eq!(result.rows[1].changed_columns, vec!["text".to_string()]);
    }

    #[tokio::test]
    async fn test_unordered_stream_is_rejected() {
        let source = vec![row(2, &[]), row(1, &[])];
        let err = compare_rows("npcs", rows(source), rows(vec![]), DataDiffOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SnapshotError::Unordered { .. }));
    }

    #[tokio::test]
    async fn test_int_float_representation_is_a_match() {
        let source = vec![row(1, &[("scale", Value::Int(2))])];
        let target = vec![row(1, &[("scale", Value::Float(2.0))])];

        let result = compare_rows("items", rows(source), rows(target), DataDiffOptions::default())
            .await
            .unwrap();
        assert_eq!(result.matched, 1);
    }
}

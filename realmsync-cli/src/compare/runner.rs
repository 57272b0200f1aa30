//! Bounded, retrying comparison of two snapshots
//!
//! Each comparison holds a connection on both sides, so comparisons run
//! in a worker pool sized to the smaller connection budget. Reads that
//! fail transiently are retried; any other failure marks only the
//! affected object or table as `error`.

use futures::future::join_all;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;

use super::data_diff::{DataDiffOptions, compare_rows};
use super::inspector::describe;
use super::schema_diff::diff_object;
use super::types::{DataComparisonResult, DataRow, ObjectId, SchemaDiffEntry, SchemaObjectDescriptor};
use crate::resilience::{ConcurrencyLimiter, ResilienceConfig, RetryPolicy};
use crate::snapshot::{Snapshot, SnapshotError};

/// Compares a source snapshot against a target snapshot
pub struct Comparator {
    source: Arc<dyn Snapshot>,
    target: Arc<dyn Snapshot>,
    limiter: ConcurrencyLimiter,
    retry: RetryPolicy,
}

impl Comparator {
    pub fn new(source: Arc<dyn Snapshot>, target: Arc<dyn Snapshot>, config: &ResilienceConfig) -> Self {
        let limiter = ConcurrencyLimiter::for_connections(
            &config.concurrency,
            source.max_connections(),
            target.max_connections(),
        );
        Self {
            source,
            target,
            limiter,
            retry: RetryPolicy::new(config.retry.clone()),
        }
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Compare every schema object of both snapshots
    ///
    /// Fails only when an object list cannot be read; failures reading a
    /// single object become an `error` entry for that object.
    pub async fn compare_schemas(&self) -> Result<Vec<SchemaDiffEntry>, SnapshotError> {
        let source_ids = self.list_objects(self.source.as_ref()).await?;
        let target_ids = self.list_objects(self.target.as_ref()).await?;
        let all_ids: BTreeSet<&ObjectId> = source_ids.iter().chain(target_ids.iter()).collect();

        log::info!(
            "Comparing {} schema objects between '{}' and '{}' ({} workers)",
            all_ids.len(),
            self.source.name(),
            self.target.name(),
            self.limiter.max_concurrent()
        );

        let comparisons = all_ids.into_iter().map(|id| {
            self.compare_object(id, source_ids.contains(id), target_ids.contains(id))
        });
        Ok(join_all(comparisons).await)
    }

    async fn compare_object(&self, id: &ObjectId, in_source: bool, in_target: bool) -> SchemaDiffEntry {
        let _permit = match self.limiter.acquire().await {
            Ok(permit) => permit,
            Err(e) => return SchemaDiffEntry::error(id.clone(), e.to_string()),
        };

        let source = match self.fetch_descriptor(self.source.as_ref(), id, in_source).await {
            Ok(descriptor) => descriptor,
            Err(e) => return self.object_failed(id, e),
        };
        let target = match self.fetch_descriptor(self.target.as_ref(), id, in_target).await {
            Ok(descriptor) => descriptor,
            Err(e) => return self.object_failed(id, e),
        };

        diff_object(id.clone(), source.as_ref(), target.as_ref())
    }

    async fn fetch_descriptor(
        &self,
        snapshot: &dyn Snapshot,
        id: &ObjectId,
        present: bool,
    ) -> Result<Option<SchemaObjectDescriptor>, SnapshotError> {
        if !present {
            return Ok(None);
        }
        let label = format!("fetch {} from '{}'", id, snapshot.name());
        let raw = self
            .retry
            .execute(&label, || snapshot.fetch_object(id))
            .await?;
        Ok(Some(describe(&raw)))
    }

    fn object_failed(&self, id: &ObjectId, error: SnapshotError) -> SchemaDiffEntry {
        log::warn!("Comparison of {} failed: {}", id, error);
        SchemaDiffEntry::error(id.clone(), error.to_string())
    }

    async fn list_objects(&self, snapshot: &dyn Snapshot) -> Result<BTreeSet<ObjectId>, SnapshotError> {
        let label = format!("list objects of '{}'", snapshot.name());
        let ids = self.retry.execute(&label, || snapshot.list_objects()).await?;
        Ok(ids.into_iter().collect())
    }

    /// Compare the rows of one table present on both sides
    pub async fn compare_table_data(&self, table: &str, options: DataDiffOptions) -> DataComparisonResult {
        self.compare_table(table, true, true, options).await
    }

    /// Compare the rows of every table present on either side
    ///
    /// A table present on one side only is reported with all of its rows
    /// as added or removed.
    pub async fn compare_all_tables(
        &self,
        options: DataDiffOptions,
    ) -> Result<Vec<DataComparisonResult>, SnapshotError> {
        let source_tables = self.list_tables(self.source.as_ref()).await?;
        let target_tables = self.list_tables(self.target.as_ref()).await?;
        let all_tables: BTreeSet<&String> = source_tables.iter().chain(target_tables.iter()).collect();

        log::info!(
            "Comparing data of {} tables between '{}' and '{}'",
            all_tables.len(),
            self.source.name(),
            self.target.name()
        );

        let comparisons = all_tables.into_iter().map(|table| {
            self.compare_table(
                table,
                source_tables.contains(table),
                target_tables.contains(table),
                options,
            )
        });
        Ok(join_all(comparisons).await)
    }

    async fn compare_table(
        &self,
        table: &str,
        in_source: bool,
        in_target: bool,
        options: DataDiffOptions,
    ) -> DataComparisonResult {
        let _permit = match self.limiter.acquire().await {
            Ok(permit) => permit,
            Err(e) => return DataComparisonResult::failed(table, e.to_string()),
        };

        let source = self.source.as_ref();
        let target = self.target.as_ref();
        let label = format!("compare table '{}'", table);

        // A transient failure mid-stream restarts the whole merge
        let outcome = self
            .retry
            .execute(&label, move || {
                compare_rows(
                    table,
                    rows_of(source, table, in_source),
                    rows_of(target, table, in_target),
                    options,
                )
            })
            .await;

        match outcome {
            Ok(result) => result,
            Err(e) => {
                log::warn!("Data comparison of table '{}' failed: {}", table, e);
                DataComparisonResult::failed(table, e.to_string())
            }
        }
    }

    async fn list_tables(&self, snapshot: &dyn Snapshot) -> Result<BTreeSet<String>, SnapshotError> {
        let label = format!("list tables of '{}'", snapshot.name());
        let tables = self.retry.execute(&label, || snapshot.table_names()).await?;
        Ok(tables.into_iter().collect())
    }
}

fn rows_of<'a>(
    snapshot: &'a dyn Snapshot,
    table: &'a str,
    present: bool,
) -> BoxStream<'a, Result<DataRow, SnapshotError>> {
    if present {
        snapshot.table_rows(table)
    } else {
        stream::empty().boxed()
    }
}

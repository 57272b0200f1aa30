//! Atomic execution of generated statements
//!
//! Statements run strictly in order inside one transaction. The first
//! failure skips the rest and rolls everything back. Writes are never
//! retried.

use async_trait::async_trait;

use super::error::StatementExecutionError;
use super::id_mapper::TargetIndex;
use super::pipeline::CancellationHandle;
use super::sql_generator::SqlScript;
use super::types::{ApplyResult, SqlStatement, StatementOutcome, StatementVerb, SyncLogEntry};
use crate::config::TableLayout;

/// Connection to the database receiving a promotion
#[async_trait]
pub trait TargetDatabase: Send + Sync {
    fn name(&self) -> &str;

    /// Identities currently held by the target
    ///
    /// Called with the workspace lock held, right before ids are mapped.
    async fn load_index(&self, layout: &TableLayout) -> anyhow::Result<TargetIndex>;

    async fn begin(&self) -> anyhow::Result<Box<dyn TargetTransaction>>;
}

/// An open transaction on the target
#[async_trait]
pub trait TargetTransaction: Send {
    /// Execute one statement, returning the number of rows affected
    async fn execute(&mut self, statement: &SqlStatement) -> anyhow::Result<u64>;

    async fn commit(self: Box<Self>) -> anyhow::Result<()>;

    async fn rollback(self: Box<Self>) -> anyhow::Result<()>;
}

/// Script and log stubs of a dry run
#[derive(Debug, Clone)]
pub struct DryRun {
    pub script: SqlScript,
    pub log: Vec<SyncLogEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionExecutor {
    cancel: CancellationHandle,
}

impl TransactionExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop issuing statements once `cancel` fires, then roll back
    pub fn with_cancellation(cancel: CancellationHandle) -> Self {
        Self { cancel }
    }

    /// The would-be script without touching any connection
    pub fn preview(&self, statements: &[SqlStatement]) -> DryRun {
        DryRun {
            script: SqlScript::new(statements.to_vec()),
            log: statements
                .iter()
                .map(|s| SyncLogEntry::for_statement(s, StatementOutcome::Skipped))
                .collect(),
        }
    }

    pub async fn execute(&self, statements: &[SqlStatement], target: &dyn TargetDatabase) -> ApplyResult {
        self.execute_with_progress(statements, target, |_, _| {}).await
    }

    /// Execute all statements, reporting `(done, total)` after each one
    pub async fn execute_with_progress<F>(
        &self,
        statements: &[SqlStatement],
        target: &dyn TargetDatabase,
        mut on_progress: F,
    ) -> ApplyResult
    where
        F: FnMut(usize, usize) + Send,
    {
        let total = statements.len();
        let mut result = ApplyResult {
            success: false,
            applied: 0,
            failed_statement: None,
            rolled_back: false,
            cancelled: false,
            error: None,
            log: statements
                .iter()
                .map(|s| SyncLogEntry::for_statement(s, StatementOutcome::Skipped))
                .collect(),
        };

        let mut tx = match target.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                log::error!("Could not open transaction on '{}': {:#}", target.name(), e);
                result.rolled_back = true;
                result.error = Some(format!("begin transaction failed: {:#}", e));
                return result;
            }
        };

        log::info!("Executing {} statements against '{}'", total, target.name());

        for (position, statement) in statements.iter().enumerate() {
            if self.cancel.is_cancelled() {
                log::warn!(
                    "Cancellation requested, skipping {} remaining statements",
                    total - position
                );
                result.cancelled = true;
                break;
            }

            log::debug!("[{}] {}", statement.index, statement.to_sql());
            let entry = &mut result.log[position];

            match tx.execute(statement).await {
                Ok(0) if statement.verb != StatementVerb::Insert => {
                    let message = "no rows affected, target row changed since the snapshot".to_string();
                    entry.outcome = StatementOutcome::Failed;
                    entry.error = Some(message.clone());
                    result.failed_statement = Some(failure(statement, message));
                    break;
                }
                Ok(rows) => {
                    entry.outcome = StatementOutcome::Success;
                    entry.rows_affected = rows;
                    result.applied += 1;
                }
                Err(e) => {
                    let message = format!("{:#}", e);
                    entry.outcome = StatementOutcome::Failed;
                    entry.error = Some(message.clone());
                    result.failed_statement = Some(failure(statement, message));
                    break;
                }
            }

            on_progress(position + 1, total);
        }

        if result.failed_statement.is_none() && !result.cancelled {
            match tx.commit().await {
                Ok(()) => {
                    log::info!("Committed {} statements", result.applied);
                    result.success = true;
                }
                Err(e) => {
                    log::error!("Commit failed: {:#}", e);
                    result.rolled_back = true;
                    result.error = Some(format!("commit failed: {:#}", e));
                }
            }
            return result;
        }

        if let Some(failure) = &result.failed_statement {
            log::error!("{}", failure);
        }
        if let Err(e) = tx.rollback().await {
            // Dropping an uncommitted transaction discards it as well
            log::error!("Rollback reported an error: {:#}", e);
        }
        log::warn!("Transaction rolled back, {} statements discarded", result.applied);
        result.rolled_back = true;
        result
    }
}

fn failure(statement: &SqlStatement, message: String) -> StatementExecutionError {
    StatementExecutionError {
        index: statement.index,
        table: statement.table.clone(),
        entity: statement.entity.clone(),
        message,
    }
}

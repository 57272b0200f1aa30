//! Promotion pipeline orchestration
//!
//! One run moves through
//! `Idle → Validating → ResolvingDependencies → MappingIds → GeneratingSql → Executing → Completed`,
//! strictly forward, with `Failed` reachable from every non-terminal
//! stage. Progress is published on an mpsc channel; the run never talks
//! to a UI directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::dependency_graph::resolve;
use super::error::PromotionError;
use super::executor::{TargetDatabase, TransactionExecutor};
use super::id_mapper::{TargetIndex, map_ids};
use super::sql_generator::{SqlScript, generate};
use super::types::{ApplyResult, IdMapping, SyncLogEntry};
use super::validate::validate_project;
use crate::config::TableLayout;
use crate::types::ContentProject;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Idle,
    Validating,
    ResolvingDependencies,
    MappingIds,
    GeneratingSql,
    Executing,
    Completed,
    Failed,
}

impl PipelineStage {
    /// Stages that do work, in order
    const WORKING: [PipelineStage; 5] = [
        PipelineStage::Validating,
        PipelineStage::ResolvingDependencies,
        PipelineStage::MappingIds,
        PipelineStage::GeneratingSql,
        PipelineStage::Executing,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::ResolvingDependencies => "resolving dependencies",
            Self::MappingIds => "mapping ids",
            Self::GeneratingSql => "generating SQL",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Forward only; terminal stages never move again
    pub fn can_advance_to(&self, next: PipelineStage) -> bool {
        !self.is_terminal() && next > *self
    }

    /// Overall completion at `fraction` of this stage
    fn overall(&self, fraction: f64) -> Option<f64> {
        match self {
            Self::Idle => Some(0.0),
            Self::Completed => Some(1.0),
            Self::Failed => None,
            working => Self::WORKING
                .iter()
                .position(|s| s == working)
                .map(|i| (i as f64 + fraction.clamp(0.0, 1.0)) / Self::WORKING.len() as f64),
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Event published on every transition and during execution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineProgress {
    pub run_id: Uuid,
    pub stage: PipelineStage,
    /// Progress within `stage`, 0.0 to 1.0
    pub stage_fraction: f64,
    /// Progress of the whole run, 0.0 to 1.0
    pub overall: f64,
    pub message: String,
}

/// State of one pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub workspace: String,
    pub project: String,
    pub dry_run: bool,
    pub stage: PipelineStage,
    /// Every stage entered, in order
    pub history: Vec<PipelineStage>,
    pub progress: f64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    fn new(request: &PromotionRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            workspace: request.workspace.clone(),
            project: request.project.name.clone(),
            dry_run: request.dry_run,
            stage: PipelineStage::Idle,
            history: vec![PipelineStage::Idle],
            progress: 0.0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    fn advance(&mut self, next: PipelineStage) -> bool {
        if !self.stage.can_advance_to(next) {
            log::error!("[{}] Refusing transition {} -> {}", self.id, self.stage, next);
            return false;
        }
        log::info!("[{}] {} -> {}", self.id, self.stage, next);
        self.stage = next;
        self.history.push(next);
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        true
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }
}

/// Cooperative cancellation shared with the caller
#[derive(Debug, Clone, Default)]
pub struct CancellationHandle(Arc<AtomicBool>);

impl CancellationHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One lock per target workspace, held for the length of a run
#[derive(Debug, Clone, Default)]
pub struct WorkspaceLocks {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl WorkspaceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, workspace: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(workspace.to_string()).or_default().clone()
    }

    /// Take the workspace lock without waiting
    pub fn try_acquire(&self, workspace: &str) -> Result<WorkspaceGuard, PromotionError> {
        let guard = self
            .lock_for(workspace)
            .try_lock_owned()
            .map_err(|_| PromotionError::TargetBusy {
                workspace: workspace.to_string(),
            })?;
        log::debug!("Acquired lock on workspace '{}'", workspace);
        Ok(WorkspaceGuard {
            workspace: workspace.to_string(),
            _guard: guard,
        })
    }

    pub fn is_locked(&self, workspace: &str) -> bool {
        self.lock_for(workspace).try_lock().is_err()
    }
}

/// Releases the workspace lock on drop
#[derive(Debug)]
pub struct WorkspaceGuard {
    workspace: String,
    _guard: tokio::sync::OwnedMutexGuard<()>,
}

impl Drop for WorkspaceGuard {
    fn drop(&mut self) {
        log::debug!("Released lock on workspace '{}'", self.workspace);
    }
}

#[derive(Debug, Clone)]
pub struct PromotionRequest {
    /// Name of the target workspace; one run per workspace at a time
    pub workspace: String,
    pub project: ContentProject,
    pub dry_run: bool,
}

/// A run that reached `Completed`
#[derive(Debug, Clone)]
pub struct PromotionOutcome {
    pub run: PipelineRun,
    pub mappings: Vec<IdMapping>,
    pub script: SqlScript,
    /// `None` for dry runs
    pub apply: Option<ApplyResult>,
    /// Execution log, or skipped stubs for dry runs
    pub log: Vec<SyncLogEntry>,
}

/// A run that reached `Failed`
#[derive(Debug, thiserror::Error)]
#[error("promotion failed while {failed_at}: {error}")]
pub struct PipelineFailure {
    pub run: PipelineRun,
    pub failed_at: PipelineStage,
    #[source]
    pub error: PromotionError,
}

pub struct PipelineOrchestrator {
    layout: TableLayout,
    locks: WorkspaceLocks,
    events: Option<mpsc::UnboundedSender<PipelineProgress>>,
}

impl PipelineOrchestrator {
    pub fn new(layout: TableLayout, locks: WorkspaceLocks) -> Self {
        Self {
            layout,
            locks,
            events: None,
        }
    }

    /// Publish progress events; returns the receiving end
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<PipelineProgress> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    /// Run a promotion against `target`
    ///
    /// The target's identities are read after the workspace lock is taken,
    /// so ids are always allocated above whatever an earlier run committed.
    pub async fn run(
        &self,
        request: PromotionRequest,
        target: &dyn TargetDatabase,
        cancel: &CancellationHandle,
    ) -> Result<PromotionOutcome, PipelineFailure> {
        let mut run = PipelineRun::new(&request);
        log::info!(
            "[{}] Promoting '{}' ({} entities) into workspace '{}'{}",
            run.id,
            request.project.name,
            request.project.entities.len(),
            request.workspace,
            if request.dry_run { " (dry run)" } else { "" }
        );

        let _guard = match self.locks.try_acquire(&request.workspace) {
            Ok(guard) => guard,
            Err(e) => return Err(self.fail(run, e)),
        };

        // Validating
        if let Err(e) = self.enter(&mut run, PipelineStage::Validating, cancel) {
            return Err(self.fail(run, e));
        }
        if let Err(e) = validate_project(&request.project, &self.layout) {
            return Err(self.fail(run, e.into()));
        }
        self.emit(&mut run, 1.0, format!("{} entities valid", request.project.entities.len()));

        // ResolvingDependencies
        if let Err(e) = self.enter(&mut run, PipelineStage::ResolvingDependencies, cancel) {
            return Err(self.fail(run, e));
        }
        let ordered = match resolve(&request.project.entities) {
            Ok(ordered) => ordered,
            Err(e) => return Err(self.fail(run, e.into())),
        };
        self.emit(&mut run, 1.0, format!("{} entities ordered", ordered.len()));

        // MappingIds
        if let Err(e) = self.enter(&mut run, PipelineStage::MappingIds, cancel) {
            return Err(self.fail(run, e));
        }
        let index: TargetIndex = match target.load_index(&self.layout).await {
            Ok(index) => index,
            Err(e) => return Err(self.fail(run, PromotionError::Target(e))),
        };
        let ids = match map_ids(ordered.iter().map(|r| &r.entity), &index) {
            Ok(ids) => ids,
            Err(e) => return Err(self.fail(run, e.into())),
        };
        self.emit(
            &mut run,
            1.0,
            format!("{} matched, {} allocated", ids.len() - ids.allocated(), ids.allocated()),
        );

        // GeneratingSql
        if let Err(e) = self.enter(&mut run, PipelineStage::GeneratingSql, cancel) {
            return Err(self.fail(run, e));
        }
        let statements = match generate(&ordered, &ids, &index, &self.layout) {
            Ok(statements) => statements,
            Err(e) => return Err(self.fail(run, e.into())),
        };
        self.emit(&mut run, 1.0, format!("{} statements generated", statements.len()));

        let executor = TransactionExecutor::with_cancellation(cancel.clone());

        if request.dry_run {
            let dry = executor.preview(&statements);
            self.complete(&mut run, "dry run, target untouched");
            return Ok(PromotionOutcome {
                run,
                mappings: ids.to_vec(),
                script: dry.script,
                apply: None,
                log: dry.log,
            });
        }

        // Executing: cancellation from here on rolls back instead of aborting
        if let Err(e) = self.enter(&mut run, PipelineStage::Executing, cancel) {
            return Err(self.fail(run, e));
        }
        let run_id = run.id;
        let result = executor
            .execute_with_progress(&statements, target, |done, total| {
                let fraction = done as f64 / total as f64;
                self.publish(PipelineProgress {
                    run_id,
                    stage: PipelineStage::Executing,
                    stage_fraction: fraction,
                    overall: PipelineStage::Executing.overall(fraction).unwrap_or(0.0),
                    message: format!("{}/{} statements", done, total),
                });
            })
            .await;

        if !result.success {
            return Err(self.fail(run, PromotionError::Execution { result }));
        }

        self.complete(&mut run, &format!("{} statements committed", result.applied));
        Ok(PromotionOutcome {
            run,
            mappings: ids.to_vec(),
            script: SqlScript::new(statements),
            log: result.log.clone(),
            apply: Some(result),
        })
    }

    /// Honour cancellation at the boundary, then enter `stage`
    fn enter(&self, run: &mut PipelineRun, stage: PipelineStage, cancel: &CancellationHandle) -> Result<(), PromotionError> {
        if cancel.is_cancelled() {
            log::warn!("[{}] Cancelled before {}", run.id, stage);
            return Err(PromotionError::Cancelled { stage });
        }
        run.advance(stage);
        self.emit(run, 0.0, stage.to_string());
        Ok(())
    }

    fn complete(&self, run: &mut PipelineRun, message: &str) {
        run.advance(PipelineStage::Completed);
        self.emit(run, 1.0, message.to_string());
        if let Some(duration) = run.duration() {
            log::info!("[{}] Completed in {}ms", run.id, duration.num_milliseconds());
        }
    }

    fn fail(&self, mut run: PipelineRun, error: PromotionError) -> PipelineFailure {
        let failed_at = run.stage;
        log::error!("[{}] Failed while {}: {}", run.id, failed_at, error);
        run.advance(PipelineStage::Failed);
        self.emit(&mut run, 1.0, error.to_string());
        PipelineFailure { run, failed_at, error }
    }

    fn emit(&self, run: &mut PipelineRun, stage_fraction: f64, message: String) {
        if let Some(overall) = run.stage.overall(stage_fraction) {
            run.progress = overall;
        }
        self.publish(PipelineProgress {
            run_id: run.id,
            stage: run.stage,
            stage_fraction,
            overall: run.progress,
            message,
        });
    }

    fn publish(&self, event: PipelineProgress) {
        if let Some(events) = &self.events {
            // Receiver gone means nobody is watching
            let _ = events.send(event);
        }
    }
}

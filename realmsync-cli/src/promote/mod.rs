//! Dependency-aware content promotion
//!
//! A content project is validated, ordered by its references, mapped onto
//! target ids, turned into SQL and applied in one transaction. The
//! [`PipelineOrchestrator`] drives those steps as a forward-only run.

pub mod dependency_graph;
pub mod error;
pub mod executor;
pub mod id_mapper;
pub mod pipeline;
pub mod sql_generator;
pub mod sqlite_target;
pub mod types;
pub mod validate;

pub use dependency_graph::{DependencyGraph, ResolvedEntity, resolve};
pub use error::{
    CycleError, MappingConflict, MappingError, PromotionError, StatementExecutionError, ValidationError, ValidationIssue,
};
pub use executor::{DryRun, TargetDatabase, TargetTransaction, TransactionExecutor};
pub use id_mapper::{IdMap, TargetIndex, TargetRecord, map_ids};
pub use pipeline::{
    CancellationHandle, PipelineFailure, PipelineOrchestrator, PipelineProgress, PipelineRun, PipelineStage,
    PromotionOutcome, PromotionRequest, WorkspaceGuard, WorkspaceLocks,
};
pub use sql_generator::{SqlScript, generate};
pub use sqlite_target::{SqliteTarget, load_target_index};
pub use types::*;
pub use validate::validate_project;

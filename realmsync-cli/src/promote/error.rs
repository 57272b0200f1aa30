//! Error types for the promotion pipeline
//!
//! Every error before `Executing` aborts the run without touching the
//! target. Execution errors always come with a rolled-back [`ApplyResult`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::pipeline::PipelineStage;
use super::types::ApplyResult;
use crate::types::EntityKey;

/// A single problem found in a content project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub entity: Option<EntityKey>,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(entity: Option<EntityKey>, message: impl Into<String>) -> Self {
        Self {
            entity,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.entity {
            Some(entity) => write!(f, "{}: {}", entity, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Malformed content project or unresolved reference
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("content project is invalid ({} issue(s)): {}", .issues.len(), join(.issues, "; "))]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

/// Dependency cycle; `chain` starts and ends with the same entity
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dependency cycle: {}", join(.chain, " -> "))]
pub struct CycleError {
    pub chain: Vec<EntityKey>,
}

/// More than one target row carries the natural key of a source entity
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("ambiguous match for {entity}: target ids {}", join(.candidates, ", "))]
pub struct MappingConflict {
    pub entity: EntityKey,
    pub candidates: Vec<i64>,
}

/// Why source identities could not be mapped onto the target
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error(transparent)]
    Conflict(#[from] MappingConflict),

    #[error("no id left for {entity}: target ids already reach {floor}")]
    Exhausted { entity: EntityKey, floor: i64 },
}

/// A generated statement failed on the target
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("statement {index} ({table}, {entity}) failed: {message}")]
pub struct StatementExecutionError {
    pub index: usize,
    pub table: String,
    pub entity: EntityKey,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum PromotionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    /// Execution failed and the transaction was rolled back
    #[error("{}", execution_message(.result))]
    Execution { result: ApplyResult },

    #[error("promotion cancelled before {stage}")]
    Cancelled { stage: PipelineStage },

    #[error("a promotion is already running against workspace '{workspace}'")]
    TargetBusy { workspace: String },

    #[error("target error: {0:#}")]
    Target(anyhow::Error),
}

impl PromotionError {
    /// Whether the error was raised before any statement reached the target
    pub fn is_pre_execution(&self) -> bool {
        !matches!(self, PromotionError::Execution { .. })
    }

    pub fn apply_result(&self) -> Option<&ApplyResult> {
        match self {
            PromotionError::Execution { result } => Some(result),
            _ => None,
        }
    }
}

fn execution_message(result: &ApplyResult) -> String {
    let cause = match (&result.failed_statement, &result.error, result.cancelled) {
        (Some(failure), _, _) => failure.to_string(),
        (None, Some(error), _) => error.clone(),
        (None, None, true) => "cancelled during execution".to_string(),
        (None, None, false) => "unknown failure".to_string(),
    };
    format!("execution failed, transaction rolled back: {}", cause)
}

fn join<T: std::fmt::Display>(items: &[T], separator: &str) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(separator)
}

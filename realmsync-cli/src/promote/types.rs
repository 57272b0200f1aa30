//! Core data types for content promotion
//!
//! These types describe one promotion run: dependency edges between
//! content entities, id mappings into the target, generated statements
//! and the per-statement execution log.

use serde::{Deserialize, Serialize};

use crate::types::{EntityKey, EntityType, Value, quote_ident};

/// Reporting group of a generated statement
///
/// Derived from how many distinct entities an entity depends on. Used for
/// grouping only, never to reorder statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionCategory {
    /// No dependencies on other entities in the run
    ReferenceData,
    /// Depends on exactly one other entity
    Dependent,
    /// Depends on two or more entities
    Linked,
}

impl ExecutionCategory {
    pub fn from_dependency_count(count: usize) -> Self {
        match count {
            0 => Self::ReferenceData,
            1 => Self::Dependent,
            _ => Self::Linked,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::ReferenceData => "Reference data",
            Self::Dependent => "Dependent content",
            Self::Linked => "Linked content",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::ReferenceData => "○",
            Self::Dependent => "→",
            Self::Linked => "⬌",
        }
    }
}

/// `from` must be written after `to`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: EntityKey,
    pub to: EntityKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Same type and natural key already exist in the target
    Matched,
    /// New id allocated above the target's maximum
    Allocated,
}

impl Resolution {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Matched => "matched",
            Self::Allocated => "allocated",
        }
    }
}

/// Source-to-target identity of one entity, valid for a single run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMapping {
    pub entity_type: EntityType,
    pub natural_key: String,
    pub source_id: i64,
    pub target_id: i64,
    pub resolution: Resolution,
}

impl IdMapping {
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type, self.natural_key.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementVerb {
    Insert,
    Update,
    Delete,
}

impl StatementVerb {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Insert => "+",
            Self::Update => "~",
            Self::Delete => "×",
        }
    }
}

/// One generated statement with every reference already remapped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlStatement {
    /// Position in execution order, starting at 0
    pub index: usize,
    pub category: ExecutionCategory,
    pub entity: EntityKey,
    pub table: String,
    pub verb: StatementVerb,
    /// Column identifying the row for update and delete
    pub key_column: String,
    /// Target id of the row
    pub key_value: i64,
    /// Insert: the full row. Update: changed columns only. Delete: empty.
    pub columns: Vec<(String, Value)>,
}

impl SqlStatement {
    pub fn column(&self, name: &str) -> Option<&Value> {
        self.columns.iter().find(|(c, _)| c == name).map(|(_, v)| v)
    }

    /// SQL text with `?` placeholders and the values to bind, in order
    pub fn to_parameterized(&self) -> (String, Vec<Value>) {
        let table = quote_ident(&self.table);
        let key = quote_ident(&self.key_column);
        match self.verb {
            StatementVerb::Insert => {
                let names: Vec<String> = self.columns.iter().map(|(c, _)| quote_ident(c)).collect();
                let marks = vec!["?"; self.columns.len()].join(", ");
                let values = self.columns.iter().map(|(_, v)| v.clone()).collect();
                (
                    format!("INSERT INTO {} ({}) VALUES ({})", table, names.join(", "), marks),
                    values,
                )
            }
            StatementVerb::Update => {
                let sets: Vec<String> = self
                    .columns
                    .iter()
                    .map(|(c, _)| format!("{} = ?", quote_ident(c)))
                    .collect();
                let mut values: Vec<Value> = self.columns.iter().map(|(_, v)| v.clone()).collect();
                values.push(Value::Int(self.key_value));
                (
                    format!("UPDATE {} SET {} WHERE {} = ?", table, sets.join(", "), key),
                    values,
                )
            }
            StatementVerb::Delete => (
                format!("DELETE FROM {} WHERE {} = ?", table, key),
                vec![Value::Int(self.key_value)],
            ),
        }
    }

    /// SQL text with literals inlined, for previews
    pub fn to_sql(&self) -> String {
        let (sql, values) = self.to_parameterized();
        let mut values = values.into_iter();
        let mut out = String::with_capacity(sql.len() + 32);
        let mut in_quotes = false;
        for c in sql.chars() {
            match c {
                '"' => {
                    in_quotes = !in_quotes;
                    out.push(c);
                }
                '?' if !in_quotes => match values.next() {
                    Some(value) => out.push_str(&value.to_sql_literal()),
                    None => out.push(c),
                },
                _ => out.push(c),
            }
        }
        out.push(';');
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementOutcome {
    Success,
    Failed,
    Skipped,
}

/// Execution record of one statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    pub index: usize,
    pub entity: EntityKey,
    pub table: String,
    pub verb: StatementVerb,
    pub outcome: StatementOutcome,
    pub rows_affected: u64,
    pub error: Option<String>,
}

impl SyncLogEntry {
    pub fn for_statement(statement: &SqlStatement, outcome: StatementOutcome) -> Self {
        Self {
            index: statement.index,
            entity: statement.entity.clone(),
            table: statement.table.clone(),
            verb: statement.verb,
            outcome,
            rows_affected: 0,
            error: None,
        }
    }
}

/// Outcome of executing a script: all statements committed or none
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyResult {
    pub success: bool,
    /// Statements that executed successfully before commit or rollback
    pub applied: usize,
    pub failed_statement: Option<super::error::StatementExecutionError>,
    pub rolled_back: bool,
    pub cancelled: bool,
    /// Error outside any statement (begin or commit)
    pub error: Option<String>,
    pub log: Vec<SyncLogEntry>,
}

impl ApplyResult {
    pub fn outcomes(&self) -> Vec<StatementOutcome> {
        self.log.iter().map(|e| e.outcome).collect()
    }
}

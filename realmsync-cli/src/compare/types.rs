//! Data model for schema and data comparison results

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{RowKey, Value};

/// Kind of schema object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectCategory {
    Table,
    View,
    Index,
    Constraint,
    Trigger,
    Function,
}

impl ObjectCategory {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::View => "view",
            Self::Index => "index",
            Self::Constraint => "constraint",
            Self::Trigger => "trigger",
            Self::Function => "function",
        }
    }
}

impl std::fmt::Display for ObjectCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Identity of a schema object: objects are matched on (category, name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId {
    pub category: ObjectCategory,
    pub name: String,
}

impl ObjectId {
    pub fn new(category: ObjectCategory, name: impl Into<String>) -> Self {
        Self {
            category,
            name: name.into(),
        }
    }

    pub fn table(name: impl Into<String>) -> Self {
        Self::new(ObjectCategory::Table, name)
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.category, self.name)
    }
}

/// Comparison status of an object or row
///
/// `Added` means present only in the source, `Removed` only in the target.
/// The same convention applies to schema objects and data rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffStatus {
    Match,
    Added,
    Removed,
    Modified,
    /// The object could not be read from one of the snapshots
    Error,
}

impl DiffStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Match => "match",
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Modified => "modified",
            Self::Error => "error",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Match => "✓",
            Self::Added => "+",
            Self::Removed => "-",
            Self::Modified => "~",
            Self::Error => "!",
        }
    }
}

impl std::fmt::Display for DiffStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One element of an object definition: a column, an indexed column,
/// a constraint reference or a normalized SQL body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionItem {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
}

impl DefinitionItem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Render attributes as `key=value, ...` for reports
    pub fn describe(&self) -> String {
        self.attributes
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Normalized, immutable description of one schema object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaObjectDescriptor {
    pub category: ObjectCategory,
    pub name: String,
    pub definition: Vec<DefinitionItem>,
    /// blake3 hex digest of the canonical definition
    pub checksum: String,
}

impl SchemaObjectDescriptor {
    pub fn id(&self) -> ObjectId {
        ObjectId::new(self.category, self.name.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldChangeKind {
    Added,
    Removed,
    Changed,
    /// Same definition, different position
    Moved,
}

/// Field-level difference between two definitions of the same object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub item: String,
    pub kind: FieldChangeKind,
    pub source: Option<String>,
    pub target: Option<String>,
}

impl std::fmt::Display for FieldChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            FieldChangeKind::Added => write!(f, "{}: added", self.item),
            FieldChangeKind::Removed => write!(f, "{}: removed", self.item),
            FieldChangeKind::Changed => write!(
                f,
                "{}: {} -> {}",
                self.item,
                self.source.as_deref().unwrap_or(""),
                self.target.as_deref().unwrap_or("")
            ),
            FieldChangeKind::Moved => write!(
                f,
                "{}: moved {} -> {}",
                self.item,
                self.source.as_deref().unwrap_or(""),
                self.target.as_deref().unwrap_or("")
            ),
        }
    }
}

/// Result of comparing one schema object across both snapshots
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDiffEntry {
    pub object: ObjectId,
    pub status: DiffStatus,
    pub source: Option<SchemaObjectDescriptor>,
    pub target: Option<SchemaObjectDescriptor>,
    /// Populated only when `status` is `Modified`
    pub changes: Vec<FieldChange>,
    /// Populated only when `status` is `Error`
    pub error: Option<String>,
}

impl SchemaDiffEntry {
    pub fn error(object: ObjectId, message: impl Into<String>) -> Self {
        Self {
            object,
            status: DiffStatus::Error,
            source: None,
            target: None,
            changes: Vec::new(),
            error: Some(message.into()),
        }
    }
}

/// A row fetched from a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRow {
    pub key: RowKey,
    pub columns: BTreeMap<String, Value>,
    pub checksum: String,
}

impl DataRow {
    /// Build a row and compute its checksum over every column
    pub fn new(key: RowKey, columns: BTreeMap<String, Value>) -> Self {
        let mut hasher = blake3::Hasher::new();
        for (name, value) in &columns {
            hasher.update(&(name.len() as u64).to_le_bytes());
            hasher.update(name.as_bytes());
            value.write_canonical(&mut hasher);
        }
        let checksum = hasher.finalize().to_hex().to_string();
        Self { key, columns, checksum }
    }
}

/// Per-row comparison outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRowDiff {
    pub key: RowKey,
    pub status: DiffStatus,
    pub changed_columns: Vec<String>,
}

/// Aggregated result of comparing one table's rows
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataComparisonResult {
    pub table: String,
    pub source_count: u64,
    pub target_count: u64,
    pub matched: u64,
    pub added: u64,
    pub removed: u64,
    pub modified: u64,
    /// Empty when the comparison ran in counts-only mode
    pub rows: Vec<DataRowDiff>,
    pub error: Option<String>,
}

impl DataComparisonResult {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    pub fn failed(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Table-level status summarising the row statuses
    pub fn status(&self) -> DiffStatus {
        if self.error.is_some() {
            DiffStatus::Error
        } else if self.added + self.removed + self.modified == 0 {
            DiffStatus::Match
        } else {
            DiffStatus::Modified
        }
    }

    pub fn has_differences(&self) -> bool {
        self.added + self.removed + self.modified > 0
    }
}

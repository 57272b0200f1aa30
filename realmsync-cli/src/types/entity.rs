//! Content entity and identity model
//!
//! Entities are matched across environments by natural key, never by
//! numeric id: ids differ between a dev database and production.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use super::value::Value;

/// Kind of game content an entity represents
///
/// Declaration order is the tie-break priority used when ordering
/// independent entities: reference data first, dependent content last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    State,
    Skill,
    Item,
    Monster,
    Npc,
    Quest,
}

impl EntityType {
    pub fn all() -> &'static [EntityType] {
        &[
            EntityType::State,
            EntityType::Skill,
            EntityType::Item,
            EntityType::Monster,
            EntityType::Npc,
            EntityType::Quest,
        ]
    }

    /// Ordering priority (lower = earlier among otherwise unordered entities)
    pub fn priority(&self) -> u8 {
        *self as u8
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::State => "State",
            Self::Skill => "Skill",
            Self::Item => "Item",
            Self::Monster => "Monster",
            Self::Npc => "NPC",
            Self::Quest => "Quest",
        }
    }

    /// Key used in configuration files and JSON
    pub fn key(&self) -> &'static str {
        match self {
            Self::State => "state",
            Self::Skill => "skill",
            Self::Item => "item",
            Self::Monster => "monster",
            Self::Npc => "npc",
            Self::Quest => "quest",
        }
    }
}

impl FromStr for EntityType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        EntityType::all()
            .iter()
            .copied()
            .find(|t| t.key().eq_ignore_ascii_case(s) || t.label().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow::anyhow!("Unknown entity type: {}", s))
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Cross-environment identity of an entity: type plus natural key
///
/// The derived ordering (type priority, then natural key) is the
/// deterministic tie-break of the dependency resolver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub entity_type: EntityType,
    pub natural_key: String,
}

impl EntityKey {
    pub fn new(entity_type: EntityType, natural_key: impl Into<String>) -> Self {
        Self {
            entity_type,
            natural_key: natural_key.into(),
        }
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.entity_type.key(), self.natural_key)
    }
}

/// Outgoing reference from one entity to another
///
/// `column` is the foreign-key column on the referencing entity's table;
/// it receives the referenced entity's target id during SQL generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRef {
    pub column: String,
    #[serde(flatten)]
    pub target: EntityKey,
}

impl EntityRef {
    pub fn new(column: impl Into<String>, entity_type: EntityType, natural_key: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            target: EntityKey::new(entity_type, natural_key),
        }
    }
}

/// A piece of game content as authored in the source environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentEntity {
    pub entity_type: EntityType,
    pub natural_key: String,
    /// Numeric id in the source environment
    pub source_id: i64,
    /// Plain column values (references excluded)
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    #[serde(default)]
    pub references: Vec<EntityRef>,
}

impl ContentEntity {
    pub fn new(entity_type: EntityType, natural_key: impl Into<String>, source_id: i64) -> Self {
        Self {
            entity_type,
            natural_key: natural_key.into(),
            source_id,
            fields: BTreeMap::new(),
            references: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_reference(
        mut self,
        column: impl Into<String>,
        entity_type: EntityType,
        natural_key: impl Into<String>,
    ) -> Self {
        self.references.push(EntityRef::new(column, entity_type, natural_key));
        self
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type, self.natural_key.clone())
    }
}

/// A set of content entities to promote, as exported by the editor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentProject {
    #[serde(default)]
    pub name: String,
    pub entities: Vec<ContentEntity>,
}

impl ContentProject {
    /// Load a content project from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read content project: {}", path.display()))?;
        let project: ContentProject = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse content project: {}", path.display()))?;
        log::info!(
            "Loaded content project '{}' with {} entities",
            project.name,
            project.entities.len()
        );
        Ok(project)
    }
}

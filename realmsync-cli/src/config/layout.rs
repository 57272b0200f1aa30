//! Mapping of entity types to target tables

use std::collections::BTreeMap;

use super::TableSpecOverride;
use crate::types::EntityType;

/// Where one entity type lives in the target database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub table: String,
    pub id_column: String,
    pub natural_key_column: String,
}

impl TableSpec {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            id_column: "id".to_string(),
            natural_key_column: "code".to_string(),
        }
    }

    /// Columns the generator writes itself and content may not set
    pub fn is_reserved(&self, column: &str) -> bool {
        column == self.id_column || column == self.natural_key_column
    }
}

/// Table specs for every entity type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLayout {
    specs: BTreeMap<EntityType, TableSpec>,
}

impl Default for TableLayout {
    fn default() -> Self {
        let specs = EntityType::all()
            .iter()
            .map(|t| {
                let table = match t {
                    EntityType::State => "states",
                    EntityType::Skill => "skills",
                    EntityType::Item => "items",
                    EntityType::Monster => "monsters",
                    EntityType::Npc => "npcs",
                    EntityType::Quest => "quests",
                };
                (*t, TableSpec::new(table))
            })
            .collect();
        Self { specs }
    }
}

impl TableLayout {
    pub fn spec(&self, entity_type: EntityType) -> &TableSpec {
        // Every type is populated by Default and overrides only replace
        &self.specs[&entity_type]
    }

    pub fn set(&mut self, entity_type: EntityType, spec: TableSpec) {
        self.specs.insert(entity_type, spec);
    }

    pub fn apply_override(&mut self, entity_type: EntityType, overrides: &TableSpecOverride) {
        let mut spec = self.spec(entity_type).clone();
        if let Some(table) = &overrides.table {
            spec.table = table.clone();
        }
        if let Some(column) = &overrides.id_column {
            spec.id_column = column.clone();
        }
        if let Some(column) = &overrides.natural_key_column {
            spec.natural_key_column = column.clone();
        }
        self.set(entity_type, spec);
    }

    /// Entity type stored in `table`, if any
    pub fn entity_for_table(&self, table: &str) -> Option<EntityType> {
        self.specs
            .iter()
            .find(|(_, spec)| spec.table == table)
            .map(|(t, _)| *t)
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityType, &TableSpec)> {
        self.specs.iter().map(|(t, s)| (*t, s))
    }
}

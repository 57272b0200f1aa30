//! Schema diff logic for comparing two database snapshots
//!
//! This module provides functions to:
//! - Match schema objects by (category, name) across source and target
//! - Classify each object as match, added, removed or modified
//! - Compute field-level changes for modified objects
//! - Summarise a diff into per-status statistics

use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::types::{
    DiffStatus, FieldChange, FieldChangeKind, ObjectId, SchemaDiffEntry, SchemaObjectDescriptor,
};

/// Compare two complete, normalized schema snapshots
///
/// Returns exactly one entry per distinct object across both sides,
/// sorted by (category, name).
pub fn compare_schemas(
    source: &[SchemaObjectDescriptor],
    target: &[SchemaObjectDescriptor],
) -> Vec<SchemaDiffEntry> {
    let source_map: BTreeMap<ObjectId, &SchemaObjectDescriptor> =
        source.iter().map(|d| (d.id(), d)).collect();
    let target_map: BTreeMap<ObjectId, &SchemaObjectDescriptor> =
        target.iter().map(|d| (d.id(), d)).collect();

    let ids: BTreeSet<&ObjectId> = source_map.keys().chain(target_map.keys()).collect();

    ids.into_iter()
        .map(|id| {
            diff_object(
                id.clone(),
                source_map.get(id).copied(),
                target_map.get(id).copied(),
            )
        })
        .collect()
}

/// Classify a single object given its descriptor on each side
pub fn diff_object(
    id: ObjectId,
    source: Option<&SchemaObjectDescriptor>,
    target: Option<&SchemaObjectDescriptor>,
) -> SchemaDiffEntry {
    let (status, changes) = match (source, target) {
        (Some(_), None) => (DiffStatus::Added, Vec::new()),
        (None, Some(_)) => (DiffStatus::Removed, Vec::new()),
        (Some(s), Some(t)) if s.checksum == t.checksum => (DiffStatus::Match, Vec::new()),
        (Some(s), Some(t)) => (DiffStatus::Modified, diff_definitions(s, t)),
        (None, None) => {
            return SchemaDiffEntry::error(id, "object missing from both snapshots");
        }
    };

    SchemaDiffEntry {
        object: id,
        status,
        source: source.cloned(),
        target: target.cloned(),
        changes,
        error: None,
    }
}

/// Structural comparison of two definitions of the same object
pub fn diff_definitions(
    source: &SchemaObjectDescriptor,
    target: &SchemaObjectDescriptor,
) -> Vec<FieldChange> {
    let target_items: HashMap<&str, (usize, &super::types::DefinitionItem)> = target
        .definition
        .iter()
        .enumerate()
        .map(|(pos, item)| (item.name.as_str(), (pos, item)))
        .collect();
    let source_names: BTreeSet<&str> = source.definition.iter().map(|i| i.name.as_str()).collect();

    let mut changes = Vec::new();

    for (pos, item) in source.definition.iter().enumerate() {
        match target_items.get(item.name.as_str()) {
            None => changes.push(FieldChange {
                item: item.name.clone(),
                kind: FieldChangeKind::Added,
                source: Some(item.describe()),
                target: None,
            }),
            Some((_, target_item)) if target_item.attributes != item.attributes => {
                changes.push(FieldChange {
                    item: item.name.clone(),
                    kind: FieldChangeKind::Changed,
                    source: Some(item.describe()),
                    target: Some(target_item.describe()),
                })
            }
            Some((target_pos, _)) if *target_pos != pos => changes.push(FieldChange {
                item: item.name.clone(),
                kind: FieldChangeKind::Moved,
                source: Some(pos.to_string()),
                target: Some(target_pos.to_string()),
            }),
            Some(_) => {}
        }
    }

    for item in &target.definition {
        if !source_names.contains(item.name.as_str()) {
            changes.push(FieldChange {
                item: item.name.clone(),
                kind: FieldChangeKind::Removed,
                source: None,
                target: Some(item.describe()),
            });
        }
    }

    changes
}

/// Summary statistics for a schema diff
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaDiffStats {
    pub total: usize,
    pub matching: usize,
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
    pub errors: usize,
}

impl SchemaDiffStats {
    pub fn from_entries(entries: &[SchemaDiffEntry]) -> Self {
        let mut stats = Self {
            total: entries.len(),
            ..Default::default()
        };
        for entry in entries {
            match entry.status {
                DiffStatus::Match => stats.matching += 1,
                DiffStatus::Added => stats.added += 1,
                DiffStatus::Removed => stats.removed += 1,
                DiffStatus::Modified => stats.modified += 1,
                DiffStatus::Error => stats.errors += 1,
            }
        }
        stats
    }

    pub fn has_changes(&self) -> bool {
        self.added + self.removed + self.modified > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::inspector::describe;
    use crate::compare::types::ObjectCategory;
    use crate::snapshot::{RawColumn, RawSchemaObject};

    fn table(name: &str, columns: Vec<RawColumn>) -> SchemaObjectDescriptor {
        describe(&RawSchemaObject::table(name, columns))
    }

    fn view(name: &str, sql: &str) -> SchemaObjectDescriptor {
        describe(&RawSchemaObject::with_sql(
            ObjectId::new(ObjectCategory::View, name),
            sql,
        ))
    }

    fn npcs() -> SchemaObjectDescriptor {
        table(
            "npcs",
            vec![
                RawColumn::new("id", "INTEGER").primary_key(1),
                RawColumn::new("code", "TEXT").not_null(),
                RawColumn::new("name", "TEXT"),
            ],
        )
    }

    #[test]
    fn test_compare_identical_schemas() {
        let schema = vec![npcs(), view("npc_names", "SELECT name FROM npcs")];

        let diff = compare_schemas(&schema, &schema);

        assert_eq!(diff.len(), 2);
        assert!(diff.iter().all(|e| e.status == DiffStatus::Match));
        let stats = SchemaDiffStats::from_entries(&diff);
        assert!(!stats.has_changes());
        assert_eq!(stats.matching, 2);
    }

    #[test]
    fn test_added_and_removed_objects() {
        let source = vec![npcs(), view("boss_list", "SELECT 1")];
        let target = vec![npcs(), table("legacy_loot", vec![RawColumn::new("id", "INTEGER")])];

        let diff = compare_schemas(&source, &target);
        let status_of = |name: &str| diff.iter().find(|e| e.object.name == name).map(|e| e.status);

        assert_eq!(status_of("boss_list"), Some(DiffStatus::Added));
        assert_eq!(status_of("legacy_loot"), Some(DiffStatus::Removed));
        assert_eq!(status_of("npcs"), Some(DiffStatus::Match));
    }

    #[test]
    fn test_modified_table_field_changes() {
        let source = vec![table(
            "monsters",
            vec![
                RawColumn::new("id", "INTEGER").primary_key(1),
                RawColumn::new("hp", "INTEGER"),
                RawColumn::new("element", "TEXT"),
            ],
        )];
        let target = vec![table(
            "monsters",
            vec![
                RawColumn::new("id", "INTEGER").primary_key(1),
                RawColumn::new("hp", "TEXT"),
                RawColumn::new("old_flag", "INTEGER"),
            ],
        )];

        let diff = compare_schemas(&source, &target);

        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].status, DiffStatus::Modified);
        let kinds: Vec<(&str, FieldChangeKind)> = diff[0]
            .changes
            .iter()
            .map(|c| (c.item.as_str(), c.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("hp", FieldChangeKind::Changed),
                ("element", FieldChangeKind::Added),
                ("old_flag", FieldChangeKind::Removed),
            ]
        );
    }

    #[test]
    fn test_reordered_columns_reported_as_moved() {
        let source = vec![table(
            "items",
            vec![RawColumn::new("id", "INTEGER"), RawColumn::new("name", "TEXT")],
        )];
        let target = vec![table(
            "items",
            vec![RawColumn::new("name", "TEXT"), RawColumn::new("id", "INTEGER")],
        )];

        let diff = compare_schemas(&source, &target);
        assert_eq!(diff[0].status, DiffStatus::Modified);
        assert!(diff[0].changes.iter().all(|c| c.kind == FieldChangeKind::Moved));
    }

    #[test]
    fn test_formatting_differences_are_not_modifications() {
        let source = vec![view("drops", "SELECT id,\n   name FROM items -- all\n")];
        let target = vec![view("drops", "select id, name from items;")];

        let diff = compare_schemas(&source, &target);
        assert_eq!(diff[0].status, DiffStatus::Match);
    }

    #[test]
    fn test_every_object_appears_exactly_once() {
        let source = vec![npcs(), view("a", "SELECT 1"), view("b", "SELECT 2")];
        let target = vec![npcs(), view("b", "SELECT 3"), view("c", "SELECT 4")];

        let diff = compare_schemas(&source, &target);

        let mut names: Vec<&str> = diff.iter().map(|e| e.object.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["a", "b", "c", "npcs"]);
        let stats = SchemaDiffStats::from_entries(&diff);
        assert_eq!(
            stats.matching + stats.added + stats.removed + stats.modified + stats.errors,
            stats.total
        );
    }

    #[test]
    fn test_same_name_different_category_not_matched() {
        let source = vec![table("loot", vec![RawColumn::new("id", "INTEGER")])];
        let target = vec![view("loot", "SELECT 1 AS id")];

        let diff = compare_schemas(&source, &target);

        assert_eq!(diff.len(), 2);
        assert!(diff.iter().any(|e| e.status == DiffStatus::Added));
        assert!(diff.iter().any(|e| e.status == DiffStatus::Removed));
    }
}

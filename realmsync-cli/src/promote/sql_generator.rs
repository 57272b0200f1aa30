//! SQL generation for a resolved, id-mapped content set
//!
//! Converts ordered entities into statements:
//! - Allocated entities become a full-row insert
//! - Matched entities become an update of the changed columns only
//! - Unchanged entities produce nothing
//!
//! Every reference is rewritten to the referenced entity's target id.

use super::dependency_graph::ResolvedEntity;
use super::error::{ValidationError, ValidationIssue};
use super::id_mapper::{IdMap, TargetIndex};
use super::types::{ExecutionCategory, Resolution, SqlStatement, StatementVerb};
use crate::config::TableLayout;
use crate::types::{ContentEntity, Value};

/// Generate statements in the order of `ordered`
pub fn generate(
    ordered: &[ResolvedEntity],
    ids: &IdMap,
    index: &TargetIndex,
    layout: &TableLayout,
) -> Result<Vec<SqlStatement>, ValidationError> {
    let mut statements = Vec::new();
    let mut issues = Vec::new();

    for resolved in ordered {
        let entity = &resolved.entity;
        let key = entity.key();

        let Some(mapping) = ids.get(&key) else {
            issues.push(ValidationIssue::new(Some(key), "entity has no id mapping"));
            continue;
        };

        let payload = match row_payload(entity, ids) {
            Ok(payload) => payload,
            Err(issue) => {
                issues.push(issue);
                continue;
            }
        };

        let spec = layout.spec(entity.entity_type);
        let (verb, columns) = match mapping.resolution {
            Resolution::Allocated => {
                let mut columns = vec![
                    (spec.id_column.clone(), Value::Int(mapping.target_id)),
                    (spec.natural_key_column.clone(), Value::Text(entity.natural_key.clone())),
                ];
                columns.extend(payload);
                (StatementVerb::Insert, columns)
            }
            Resolution::Matched => {
                let current = index.record(&key).map(|r| &r.fields);
                let changed: Vec<(String, Value)> = payload
                    .into_iter()
                    .filter(|(column, value)| match current.and_then(|f| f.get(column)) {
                        Some(existing) => !existing.same_as(value),
                        None => true,
                    })
                    .collect();
                if changed.is_empty() {
                    log::debug!("{} unchanged, no statement", key);
                    continue;
                }
                (StatementVerb::Update, changed)
            }
        };

        statements.push(SqlStatement {
            index: statements.len(),
            category: resolved.category,
            entity: key,
            table: spec.table.clone(),
            verb,
            key_column: spec.id_column.clone(),
            key_value: mapping.target_id,
            columns,
        });
    }

    if !issues.is_empty() {
        return Err(ValidationError { issues });
    }

    log::info!(
        "Generated {} statements ({} inserts, {} updates)",
        statements.len(),
        statements.iter().filter(|s| s.verb == StatementVerb::Insert).count(),
        statements.iter().filter(|s| s.verb == StatementVerb::Update).count()
    );

    Ok(statements)
}

/// Plain fields plus references rewritten through the id map
fn row_payload(entity: &ContentEntity, ids: &IdMap) -> Result<Vec<(String, Value)>, ValidationIssue> {
    let mut columns: Vec<(String, Value)> = entity
        .fields
        .iter()
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    for reference in &entity.references {
        let target_id = ids.target_id(&reference.target).ok_or_else(|| {
            ValidationIssue::new(
                Some(entity.key()),
                format!("reference '{}' to {} has no id mapping", reference.column, reference.target),
            )
        })?;
        columns.push((reference.column.clone(), Value::Int(target_id)));
    }

    Ok(columns)
}

/// A preview script: statements wrapped in a transaction with
/// category headers
#[derive(Debug, Clone, Default)]
pub struct SqlScript {
    pub statements: Vec<SqlStatement>,
}

impl SqlScript {
    pub fn new(statements: Vec<SqlStatement>) -> Self {
        Self { statements }
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn count_by_category(&self, category: ExecutionCategory) -> usize {
        self.statements.iter().filter(|s| s.category == category).count()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("-- {} statement(s)\n", self.statements.len()));
        out.push_str("BEGIN;\n");

        let mut current: Option<ExecutionCategory> = None;
        for statement in &self.statements {
            if current != Some(statement.category) {
                out.push_str(&format!("\n-- {}\n", statement.category.label()));
                current = Some(statement.category);
            }
            out.push_str(&statement.to_sql());
            out.push('\n');
        }

        out.push_str("\nCOMMIT;\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::promote::dependency_graph::resolve;
    use crate::promote::id_mapper::{TargetRecord, map_ids};
    use crate::types::{EntityKey, EntityType};
    use std::collections::BTreeMap;

    fn plan(entities: &[ContentEntity], index: &TargetIndex) -> Vec<SqlStatement> {
        let ordered = resolve(entities).unwrap();
        let ids = map_ids(ordered.iter().map(|r| &r.entity), index).unwrap();
        generate(&ordered, &ids, index, &TableLayout::default()).unwrap()
    }

    #[test]
    fn test_elder_oak_quest_carries_remapped_giver() {
        let entities = vec![
            ContentEntity::new(EntityType::Quest, "lost_seed", 3)
                .with_field("title", "The Lost Seed")
                .with_reference("giver_id", EntityType::Npc, "elder_oak"),
            ContentEntity::new(EntityType::Npc, "elder_oak", 10).with_field("name", "Elder Oak"),
        ];
        let index = TargetIndex::new()
            .with_max_id(EntityType::Npc, 40)
            .with_max_id(EntityType::Quest, 7);

        let statements = plan(&entities, &index);

        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0].table, "npcs");
        assert_eq!(statements[0].verb, StatementVerb::Insert);
        assert_eq!(statements[0].column("id"), Some(&Value::Int(41)));
        assert_eq!(statements[1].table, "quests");
        assert_eq!(statements[1].column("giver_id"), Some(&Value::Int(41)));
        assert_eq!(statements[1].column("id"), Some(&Value::Int(8)));
        assert_eq!(statements[1].category, ExecutionCategory::Dependent);
        assert!(statements.iter().enumerate().all(|(i, s)| s.index == i));
    }

    #[test]
    fn test_matched_entity_updates_changed_columns_only() {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), Value::from("Potion"));
        fields.insert("price".to_string(), Value::Int(10));
        let mut index = TargetIndex::new();
        index.insert(
            EntityKey::new(EntityType::Item, "potion"),
            TargetRecord { id: 5, fields },
        );

        let entities = vec![
            ContentEntity::new(EntityType::Item, "potion", 1)
                .with_field("name", "Potion")
                .with_field("price", Value::Int(12)),
        ];
        let statements = plan(&entities, &index);

        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].verb, StatementVerb::Update);
        assert_eq!(statements[0].key_value, 5);
        assert_eq!(statements[0].columns, vec![("price".to_string(), Value::Int(12))]);
    }

    #[test]
    fn test_unchanged_entity_emits_nothing() {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), Value::from("Slime"));
        fields.insert("hp".to_string(), Value::Float(30.0));
        let mut index = TargetIndex::new();
        index.insert(
            EntityKey::new(EntityType::Monster, "slime"),
            TargetRecord { id: 2, fields },
        );

        let entities = vec![
            ContentEntity::new(EntityType::Monster, "slime", 9)
                .with_field("name", "Slime")
                .with_field("hp", Value::Int(30)),
        ];
        assert!(plan(&entities, &index).is_empty());
    }

    #[test]
    fn test_statement_order_respects_dependencies() {
        let entities = vec![
            ContentEntity::new(EntityType::Quest, "harvest", 4)
                .with_reference("giver_id", EntityType::Npc, "farmer")
                .with_reference("reward_item_id", EntityType::Item, "scythe"),
            ContentEntity::new(EntityType::Npc, "farmer", 2).with_reference("held_item_id", EntityType::Item, "scythe"),
            ContentEntity::new(EntityType::Item, "scythe", 1),
        ];
        let statements = plan(&entities, &TargetIndex::new());

        let position = |table: &str| statements.iter().position(|s| s.table == table).unwrap();
        assert!(position("items") < position("npcs"));
        assert!(position("npcs") < position("quests"));
        assert_eq!(statements[position("quests")].category, ExecutionCategory::Linked);
    }

    #[test]
    fn test_script_render_groups_categories() {
        let entities = vec![
            ContentEntity::new(EntityType::Npc, "elder_oak", 10).with_field("name", "Elder Oak"),
            ContentEntity::new(EntityType::Quest, "lost_seed", 3).with_reference("giver_id", EntityType::Npc, "elder_oak"),
        ];
        let script = SqlScript::new(plan(&entities, &TargetIndex::new().with_max_id(EntityType::Npc, 40)));
        let text = script.render();

        assert!(text.contains("BEGIN;\n"));
        assert!(text.trim_end().ends_with("COMMIT;"));
        assert!(text.contains("-- Reference data\nINSERT INTO \"npcs\""));
        assert!(text.contains("-- Dependent content\nINSERT INTO \"quests\""));
        assert_eq!(script.count_by_category(ExecutionCategory::ReferenceData), 1);
    }
}

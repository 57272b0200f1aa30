//! Reconciliation of source identities with the target
//!
//! Entities are matched by (type, natural key). Unmatched entities get a
//! fresh id above the target's maximum for their type; allocation never
//! reuses an id within a run.

use std::collections::{BTreeMap, HashMap};

use super::error::{MappingConflict, MappingError};
use super::types::{IdMapping, Resolution};
use crate::types::{ContentEntity, EntityKey, EntityType, Value};

/// A row already present in the target
#[derive(Debug, Clone, PartialEq)]
pub struct TargetRecord {
    pub id: i64,
    /// Column values excluding id and natural key
    pub fields: BTreeMap<String, Value>,
}

/// Snapshot of what the target holds at run start
#[derive(Debug, Clone, Default)]
pub struct TargetIndex {
    records: HashMap<EntityKey, Vec<TargetRecord>>,
    max_ids: HashMap<EntityType, i64>,
}

impl TargetIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: EntityKey, record: TargetRecord) {
        self.records.entry(key).or_default().push(record);
    }

    /// Builder used by fixtures: a record with no field values
    pub fn with_record(mut self, entity_type: EntityType, natural_key: &str, id: i64) -> Self {
        self.insert(
            EntityKey::new(entity_type, natural_key),
            TargetRecord {
                id,
                fields: BTreeMap::new(),
            },
        );
        self
    }

    pub fn with_max_id(mut self, entity_type: EntityType, max_id: i64) -> Self {
        self.set_max_id(entity_type, max_id);
        self
    }

    pub fn set_max_id(&mut self, entity_type: EntityType, max_id: i64) {
        self.max_ids.insert(entity_type, max_id);
    }

    pub fn candidates(&self, key: &EntityKey) -> &[TargetRecord] {
        self.records.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The single target record for `key`, if unambiguous
    pub fn record(&self, key: &EntityKey) -> Option<&TargetRecord> {
        match self.candidates(key) {
            [record] => Some(record),
            _ => None,
        }
    }

    pub fn recorded_max(&self, entity_type: EntityType) -> Option<i64> {
        self.max_ids.get(&entity_type).copied()
    }

    fn largest_existing(&self, entity_type: EntityType) -> Option<i64> {
        self.records
            .iter()
            .filter(|(key, _)| key.entity_type == entity_type)
            .flat_map(|(_, records)| records.iter().map(|r| r.id))
            .max()
    }

    /// Ids allocated for `entity_type` must be strictly greater than this
    pub fn allocation_floor(&self, entity_type: EntityType) -> i64 {
        let recorded = self.recorded_max(entity_type).unwrap_or(0);
        let existing = self.largest_existing(entity_type).unwrap_or(0);
        recorded.max(existing)
    }

    pub fn len(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Id mappings of one run, keyed by entity
#[derive(Debug, Clone, Default)]
pub struct IdMap {
    mappings: BTreeMap<EntityKey, IdMapping>,
    /// Mapping order, as produced
    order: Vec<EntityKey>,
}

impl IdMap {
    pub fn get(&self, key: &EntityKey) -> Option<&IdMapping> {
        self.mappings.get(key)
    }

    pub fn target_id(&self, key: &EntityKey) -> Option<i64> {
        self.mappings.get(key).map(|m| m.target_id)
    }

    /// Target id for a source-side id of the given type
    pub fn translate(&self, entity_type: EntityType, source_id: i64) -> Option<i64> {
        self.mappings
            .values()
            .find(|m| m.entity_type == entity_type && m.source_id == source_id)
            .map(|m| m.target_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &IdMapping> {
        self.order.iter().filter_map(|key| self.mappings.get(key))
    }

    pub fn to_vec(&self) -> Vec<IdMapping> {
        self.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn allocated(&self) -> usize {
        self.mappings
            .values()
            .filter(|m| m.resolution == Resolution::Allocated)
            .count()
    }

    fn push(&mut self, mapping: IdMapping) {
        let key = mapping.key();
        self.order.push(key.clone());
        self.mappings.insert(key, mapping);
    }
}

/// Map every entity to a target id
///
/// Allocation follows the order of `entities`, so passing them in write
/// order gives reproducible ids.
pub fn map_ids<'a>(
    entities: impl IntoIterator<Item = &'a ContentEntity>,
    index: &TargetIndex,
) -> Result<IdMap, MappingError> {
    let mut map = IdMap::default();
    let mut allocated: HashMap<EntityType, i64> = HashMap::new();

    for entity in entities {
        let key = entity.key();
        let (target_id, resolution) = match index.candidates(&key) {
            [] => {
                let floor = index.allocation_floor(entity.entity_type);
                let counter = allocated.entry(entity.entity_type).or_insert(0);
                *counter += 1;
                let id = floor
                    .checked_add(*counter)
                    .ok_or_else(|| MappingError::Exhausted { entity: key.clone(), floor })?;
                (id, Resolution::Allocated)
            }
            [existing] => (existing.id, Resolution::Matched),
            many => {
                return Err(MappingConflict {
                    entity: key,
                    candidates: many.iter().map(|r| r.id).collect(),
                }
                .into());
            }
        };

        log::debug!("{} -> {} ({})", key, target_id, resolution.label());
        map.push(IdMapping {
            entity_type: entity.entity_type,
            natural_key: entity.natural_key.clone(),
            source_id: entity.source_id,
            target_id,
            resolution,
        });
    }

    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_elder_oak_is_allocated_above_max() {
        let entities = vec![ContentEntity::new(EntityType::Npc, "elder_oak", 10)];
        let index = TargetIndex::new().with_max_id(EntityType::Npc, 40);

        let map = map_ids(&entities, &index).unwrap();
        let mapping = map.get(&EntityKey::new(EntityType::Npc, "elder_oak")).unwrap();

        assert_eq!(mapping.resolution, Resolution::Allocated);
        assert_eq!(mapping.target_id, 41);
        assert_eq!(map.translate(EntityType::Npc, 10), Some(41));
    }

    #[test]
    fn test_existing_natural_key_is_matched() {
        let entities = vec![ContentEntity::new(EntityType::Item, "potion", 3)];
        let index = TargetIndex::new()
            .with_record(EntityType::Item, "potion", 17)
            .with_max_id(EntityType::Item, 20);

        let map = map_ids(&entities, &index).unwrap();
        let mapping = map.get(&EntityKey::new(EntityType::Item, "potion")).unwrap();

        assert_eq!(mapping.resolution, Resolution::Matched);
        assert_eq!(mapping.target_id, 17);
    }

    #[test]
    fn test_allocations_are_injective_per_type() {
        let entities: Vec<ContentEntity> = (1..=5)
            .map(|i| ContentEntity::new(EntityType::Monster, format!("slime_{}", i), i))
            .chain((1..=3).map(|i| ContentEntity::new(EntityType::Item, format!("gem_{}", i), i)))
            .collect();
        let index = TargetIndex::new()
            .with_record(EntityType::Monster, "slime_2", 7)
            .with_max_id(EntityType::Monster, 100)
            .with_max_id(EntityType::Item, 5);

        let map = map_ids(&entities, &index).unwrap();

        let monster_ids: HashSet<i64> = map
            .iter()
            .filter(|m| m.entity_type == EntityType::Monster)
            .map(|m| m.target_id)
            .collect();
        assert_eq!(monster_ids.len(), 5);
        assert!(map
            .iter()
            .filter(|m| m.resolution == Resolution::Allocated && m.entity_type == EntityType::Monster)
            .all(|m| m.target_id > 100));
        assert!(map
            .iter()
            .filter(|m| m.entity_type == EntityType::Item)
            .all(|m| m.target_id > 5));
        assert_eq!(map.allocated(), 7);
    }

    #[test]
    fn test_floor_never_below_existing_ids() {
        let entities = vec![ContentEntity::new(EntityType::Skill, "fireball", 1)];
        let index = TargetIndex::new()
            .with_record(EntityType::Skill, "heal", 55)
            .with_max_id(EntityType::Skill, 50);

        let map = map_ids(&entities, &index).unwrap();
        assert_eq!(map.target_id(&EntityKey::new(EntityType::Skill, "fireball")), Some(56));
    }

    #[test]
    fn test_missing_max_falls_back_to_zero() {
        let entities = vec![ContentEntity::new(EntityType::State, "poisoned", 9)];
        let map = map_ids(&entities, &TargetIndex::new()).unwrap();
        assert_eq!(map.target_id(&EntityKey::new(EntityType::State, "poisoned")), Some(1));
    }

    #[test]
    fn test_ambiguous_match_is_conflict() {
        let entities = vec![ContentEntity::new(EntityType::Npc, "smith", 1)];
        let index = TargetIndex::new()
            .with_record(EntityType::Npc, "smith", 4)
            .with_record(EntityType::Npc, "smith", 9);

        match map_ids(&entities, &index).unwrap_err() {
            MappingError::Conflict(err) => {
                assert_eq!(err.entity, EntityKey::new(EntityType::Npc, "smith"));
                assert_eq!(err.candidates, vec![4, 9]);
            }
            other => panic!("expected a conflict, got {}", other),
        }
    }

    #[test]
    fn test_exhausted_id_range_is_an_error() {
        let entities = vec![
            ContentEntity::new(EntityType::Item, "last_gem", 1),
            ContentEntity::new(EntityType::Item, "one_too_many", 2),
        ];
        let index = TargetIndex::new().with_max_id(EntityType::Item, i64::MAX - 1);

        let err = map_ids(&entities, &index).unwrap_err();
        assert_eq!(
            err,
            MappingError::Exhausted {
                entity: EntityKey::new(EntityType::Item, "one_too_many"),
                floor: i64::MAX - 1,
            }
        );
    }
}

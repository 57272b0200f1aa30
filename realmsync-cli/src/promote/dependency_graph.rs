//! Dependency graph logic for ordering content entities
//!
//! This module provides functions to:
//! - Build a dependency graph from natural-key references between entities
//! - Detect cycles, reporting the full chain
//! - Perform a deterministic topological sort for write ordering
//! - Categorize entities as reference data, dependent or linked content

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

use super::error::CycleError;
use super::types::{DependencyEdge, ExecutionCategory};
use crate::types::{ContentEntity, EntityKey};

/// An entity placed in write order together with its reporting category
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEntity {
    pub entity: ContentEntity,
    pub category: ExecutionCategory,
}

/// Dependency graph over a set of content entities
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Adjacency list: entity -> entities it references
    pub dependencies: BTreeMap<EntityKey, BTreeSet<EntityKey>>,
    /// Reverse adjacency: entity -> entities that reference it
    pub dependents: BTreeMap<EntityKey, BTreeSet<EntityKey>>,
}

impl DependencyGraph {
    /// Build the graph; references to entities outside the set are ignored
    pub fn build(entities: &[ContentEntity]) -> Self {
        let mut graph = DependencyGraph::default();

        for entity in entities {
            graph.dependencies.entry(entity.key()).or_default();
            graph.dependents.entry(entity.key()).or_default();
        }

        for entity in entities {
            let from = entity.key();
            for reference in &entity.references {
                if !graph.dependencies.contains_key(&reference.target) {
                    continue;
                }
                graph
                    .dependencies
                    .entry(from.clone())
                    .or_default()
                    .insert(reference.target.clone());
                graph
                    .dependents
                    .entry(reference.target.clone())
                    .or_default()
                    .insert(from.clone());
            }
        }

        graph
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    pub fn edges(&self) -> Vec<DependencyEdge> {
        self.dependencies
            .iter()
            .flat_map(|(from, deps)| {
                deps.iter().map(move |to| DependencyEdge {
                    from: from.clone(),
                    to: to.clone(),
                })
            })
            .collect()
    }

    /// Categorize an entity by its count of distinct dependencies
    pub fn categorize(&self, key: &EntityKey) -> ExecutionCategory {
        let count = self
            .dependencies
            .get(key)
            .map(|deps| deps.iter().filter(|d| *d != key).count())
            .unwrap_or(0);
        ExecutionCategory::from_dependency_count(count)
    }

    /// Depth-first search with a recursion stack
    ///
    /// Returns the first cycle found as a chain that starts and ends with
    /// the same entity. Traversal order is deterministic.
    pub fn find_cycle(&self) -> Option<Vec<EntityKey>> {
        let mut done: BTreeSet<&EntityKey> = BTreeSet::new();

        for root in self.dependencies.keys() {
            if done.contains(root) {
                continue;
            }

            // Each frame: node and its remaining dependencies
            let mut stack: Vec<(&EntityKey, Vec<&EntityKey>)> = vec![(root, self.sorted_deps(root))];
            let mut on_stack: BTreeSet<&EntityKey> = BTreeSet::from([root]);

            while let Some((node, pending)) = stack.last_mut() {
                let node = *node;
                match pending.pop() {
                    Some(next) if on_stack.contains(next) => {
                        let start = stack.iter().position(|(n, _)| *n == next).unwrap_or(0);
                        let mut chain: Vec<EntityKey> =
                            stack[start..].iter().map(|(n, _)| (*n).clone()).collect();
                        chain.push(next.clone());
                        return Some(chain);
                    }
                    Some(next) if done.contains(next) => {}
                    Some(next) => {
                        on_stack.insert(next);
                        stack.push((next, self.sorted_deps(next)));
                    }
                    None => {
                        on_stack.remove(node);
                        done.insert(node);
                        stack.pop();
                    }
                }
            }
        }

        None
    }

    /// Dependencies in reverse order so `pop` visits the smallest first
    fn sorted_deps(&self, key: &EntityKey) -> Vec<&EntityKey> {
        self.dependencies
            .get(key)
            .map(|deps| deps.iter().rev().collect())
            .unwrap_or_default()
    }

    /// Topological sort using Kahn's algorithm
    ///
    /// Returns entities in write order (dependencies first). Among entities
    /// ready at the same time, the lowest (type priority, natural key)
    /// goes first.
    pub fn topological_sort(&self) -> Result<Vec<EntityKey>, CycleError> {
        if let Some(chain) = self.find_cycle() {
            return Err(CycleError { chain });
        }

        let mut remaining: BTreeMap<&EntityKey, usize> = self
            .dependencies
            .iter()
            .map(|(key, deps)| (key, deps.len()))
            .collect();

        let mut ready: BinaryHeap<Reverse<&EntityKey>> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(key, _)| Reverse(*key))
            .collect();

        let mut order = Vec::with_capacity(self.dependencies.len());

        while let Some(Reverse(key)) = ready.pop() {
            order.push(key.clone());

            if let Some(dependents) = self.dependents.get(key) {
                for dependent in dependents {
                    if let Some(count) = remaining.get_mut(dependent) {
                        *count -= 1;
                        if *count == 0 {
                            ready.push(Reverse(dependent));
                        }
                    }
                }
            }
        }

        if order.len() != self.dependencies.len() {
            // Unreachable once find_cycle passed, kept as a guard
            let chain = self
                .dependencies
                .keys()
                .filter(|k| !order.contains(k))
                .cloned()
                .collect();
            return Err(CycleError { chain });
        }

        Ok(order)
    }
}

/// Order a content set for writing
pub fn resolve(entities: &[ContentEntity]) -> Result<Vec<ResolvedEntity>, CycleError> {
    let graph = DependencyGraph::build(entities);
    let order = graph.topological_sort()?;

    let by_key: BTreeMap<EntityKey, &ContentEntity> = entities.iter().map(|e| (e.key(), e)).collect();

    let resolved: Vec<ResolvedEntity> = order
        .iter()
        .filter_map(|key| {
            by_key.get(key).map(|entity| ResolvedEntity {
                entity: (*entity).clone(),
                category: graph.categorize(key),
            })
        })
        .collect();

    log::debug!(
        "Resolved {} entities with {} dependency edges",
        resolved.len(),
        graph.edges().len()
    );

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityType;

    fn npc(key: &str, id: i64) -> ContentEntity {
        ContentEntity::new(EntityType::Npc, key, id)
    }

    fn quest(key: &str, id: i64) -> ContentEntity {
        ContentEntity::new(EntityType::Quest, key, id)
    }

    fn keys(resolved: &[ResolvedEntity]) -> Vec<String> {
        resolved.iter().map(|r| r.entity.key().to_string()).collect()
    }

    #[test]
    fn test_reference_data_entity() {
        let entities = vec![npc("elder_oak", 10)];
        let graph = DependencyGraph::build(&entities);
        assert_eq!(
            graph.categorize(&EntityKey::new(EntityType::Npc, "elder_oak")),
            ExecutionCategory::ReferenceData
        );
    }

    #[test]
    fn test_dependent_and_linked_entities() {
        let entities = vec![
            npc("elder_oak", 10),
            ContentEntity::new(EntityType::Item, "acorn", 1),
            quest("lost_seed", 3).with_reference("giver_id", EntityType::Npc, "elder_oak"),
            quest("harvest", 4)
                .with_reference("giver_id", EntityType::Npc, "elder_oak")
                .with_reference("reward_item_id", EntityType::Item, "acorn"),
        ];
        let graph = DependencyGraph::build(&entities);

        assert_eq!(
            graph.categorize(&EntityKey::new(EntityType::Quest, "lost_seed")),
            ExecutionCategory::Dependent
        );
        assert_eq!(
            graph.categorize(&EntityKey::new(EntityType::Quest, "harvest")),
            ExecutionCategory::Linked
        );
        assert_eq!(graph.edges().len(), 3);
    }

    #[test]
    fn test_dependencies_come_first() {
        let entities = vec![
            quest("lost_seed", 3).with_reference("giver_id", EntityType::Npc, "elder_oak"),
            npc("elder_oak", 10),
        ];
        let order = keys(&resolve(&entities).unwrap());
        assert_eq!(order, vec!["npc:elder_oak", "quest:lost_seed"]);
    }

    #[test]
    fn test_chain_order() {
        let entities = vec![
            quest("finale", 3).with_reference("previous_id", EntityType::Quest, "middle"),
            quest("middle", 2).with_reference("previous_id", EntityType::Quest, "opening"),
            quest("opening", 1),
        ];
        let order = keys(&resolve(&entities).unwrap());
        assert_eq!(order, vec!["quest:opening", "quest:middle", "quest:finale"]);
    }

    #[test]
    fn test_ties_broken_by_type_priority_then_key() {
        let entities = vec![
            quest("b_quest", 1),
            npc("zed", 1),
            npc("amy", 2),
            ContentEntity::new(EntityType::State, "poisoned", 1),
            quest("a_quest", 2),
        ];
        let order = keys(&resolve(&entities).unwrap());
        assert_eq!(
            order,
            vec!["state:poisoned", "npc:amy", "npc:zed", "quest:a_quest", "quest:b_quest"]
        );
    }

    #[test]
    fn test_order_independent_of_input_order() {
        let mut entities = vec![
            npc("elder_oak", 10),
            npc("smith", 11),
            quest("lost_seed", 3).with_reference("giver_id", EntityType::Npc, "elder_oak"),
            quest("forge", 4).with_reference("giver_id", EntityType::Npc, "smith"),
        ];
        let first = keys(&resolve(&entities).unwrap());
        entities.reverse();
        let second = keys(&resolve(&entities).unwrap());
        assert_eq!(first, second);
    }

    #[test]
    fn test_two_quest_cycle() {
        let entities = vec![
            quest("a", 1).with_reference("requires_id", EntityType::Quest, "b"),
            quest("b", 2).with_reference("requires_id", EntityType::Quest, "a"),
        ];
        let err = resolve(&entities).unwrap_err();
        let chain: Vec<String> = err.chain.iter().map(|k| k.to_string()).collect();
        assert_eq!(chain, vec!["quest:a", "quest:b", "quest:a"]);
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let entities = vec![quest("loop", 1).with_reference("requires_id", EntityType::Quest, "loop")];
        let err = resolve(&entities).unwrap_err();
        assert_eq!(err.chain.len(), 2);
        assert_eq!(err.chain[0], err.chain[1]);
    }

    #[test]
    fn test_cycle_chain_excludes_entry_path() {
        let entities = vec![
            npc("start", 1).with_reference("x_id", EntityType::Quest, "c1"),
            quest("c1", 2).with_reference("next_id", EntityType::Quest, "c2"),
            quest("c2", 3).with_reference("next_id", EntityType::Quest, "c1"),
        ];
        let err = resolve(&entities).unwrap_err();
        let chain: Vec<String> = err.chain.iter().map(|k| k.to_string()).collect();
        assert_eq!(chain, vec!["quest:c1", "quest:c2", "quest:c1"]);
    }
}

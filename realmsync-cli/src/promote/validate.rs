//! Content project validation
//!
//! All issues are collected before failing so the caller can fix a
//! project in one pass.

use std::collections::{BTreeSet, HashMap};

use super::error::{ValidationError, ValidationIssue};
use crate::config::TableLayout;
use crate::types::{ContentProject, EntityKey, EntityType};

/// Check a content project before any graph or mapping work
pub fn validate_project(project: &ContentProject, layout: &TableLayout) -> Result<(), ValidationError> {
    let mut issues = Vec::new();

    if project.entities.is_empty() {
        issues.push(ValidationIssue::new(None, "content project contains no entities"));
    }

    let mut seen_keys: BTreeSet<EntityKey> = BTreeSet::new();
    let mut seen_source_ids: HashMap<(EntityType, i64), &str> = HashMap::new();

    for entity in &project.entities {
        let key = entity.key();

        if entity.natural_key.trim().is_empty() {
            issues.push(ValidationIssue::new(
                Some(key.clone()),
                format!("{} with source id {} has an empty natural key", entity.entity_type, entity.source_id),
            ));
        }

        if !seen_keys.insert(key.clone()) {
            issues.push(ValidationIssue::new(Some(key.clone()), "duplicate natural key"));
        }

        if let Some(other) = seen_source_ids.insert((entity.entity_type, entity.source_id), &entity.natural_key) {
            if other != entity.natural_key {
                issues.push(ValidationIssue::new(
                    Some(key.clone()),
                    format!("source id {} is also used by '{}'", entity.source_id, other),
                ));
            }
        }

        let spec = layout.spec(entity.entity_type);
        for field in entity.fields.keys() {
            if spec.is_reserved(field) {
                issues.push(ValidationIssue::new(
                    Some(key.clone()),
                    format!("field '{}' is reserved for the {} table's identity", field, spec.table),
                ));
            }
        }

        let mut reference_columns = BTreeSet::new();
        for reference in &entity.references {
            if spec.is_reserved(&reference.column) || entity.fields.contains_key(&reference.column) {
                issues.push(ValidationIssue::new(
                    Some(key.clone()),
                    format!("reference column '{}' collides with another column", reference.column),
                ));
            }
            if !reference_columns.insert(reference.column.as_str()) {
                issues.push(ValidationIssue::new(
                    Some(key.clone()),
                    format!("reference column '{}' is set twice", reference.column),
                ));
            }
        }
    }

    for entity in &project.entities {
        for reference in &entity.references {
            if !seen_keys.contains(&reference.target) {
                issues.push(ValidationIssue::new(
                    Some(entity.key()),
                    format!(
                        "reference '{}' points to {} which is not part of the project",
                        reference.column, reference.target
                    ),
                ));
            }
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        log::warn!("Content project '{}' failed validation with {} issue(s)", project.name, issues.len());
        Err(ValidationError { issues })
    }
}

//! Export of comparison results to JSON and CSV

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::types::{DataComparisonResult, DiffStatus, SchemaDiffEntry};

/// CSV header shared by every export
pub const CSV_HEADER: [&str; 5] = ["table", "status", "sourceCount", "targetCount", "details"];

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV serialization failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected CSV header: {0}")]
    Header(String),

    #[error("unsupported export format: {0}")]
    UnsupportedFormat(String),
}

/// One exported line of a schema or data diff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffRecord {
    pub table: String,
    /// Object category, or `data` for row comparisons; not carried by CSV
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub status: DiffStatus,
    pub source_count: Option<u64>,
    pub target_count: Option<u64>,
    pub details: String,
}

impl From<&SchemaDiffEntry> for DiffRecord {
    fn from(entry: &SchemaDiffEntry) -> Self {
        let details = match entry.status {
            DiffStatus::Modified => entry
                .changes
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join("; "),
            DiffStatus::Error => entry.error.clone().unwrap_or_default(),
            _ => String::new(),
        };
        Self {
            table: entry.object.name.clone(),
            category: Some(entry.object.category.label().to_string()),
            status: entry.status,
            source_count: entry.source.as_ref().map(|d| d.definition.len() as u64),
            target_count: entry.target.as_ref().map(|d| d.definition.len() as u64),
            details,
        }
    }
}

impl From<&DataComparisonResult> for DiffRecord {
    fn from(result: &DataComparisonResult) -> Self {
        let (source_count, target_count, details) = match &result.error {
            Some(error) => (None, None, error.clone()),
            None => (
                Some(result.source_count),
                Some(result.target_count),
                format!(
                    "matched={} added={} removed={} modified={}",
                    result.matched, result.added, result.removed, result.modified
                ),
            ),
        };
        Self {
            table: result.table.clone(),
            category: Some("data".to_string()),
            status: result.status(),
            source_count,
            target_count,
            details,
        }
    }
}

/// CSV line layout; category is not part of the CSV format
#[derive(Debug, Serialize, Deserialize)]
struct CsvRecord {
    table: String,
    status: DiffStatus,
    #[serde(rename = "sourceCount")]
    source_count: Option<u64>,
    #[serde(rename = "targetCount")]
    target_count: Option<u64>,
    details: String,
}

/// Serializes diff records to and from JSON and CSV
pub struct DiffExporter;

impl DiffExporter {
    pub fn export_as_json(records: &[DiffRecord]) -> Result<String, ExportError> {
        Ok(serde_json::to_string_pretty(records)?)
    }

    pub fn import_json(json: &str) -> Result<Vec<DiffRecord>, ExportError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn export_as_csv(records: &[DiffRecord]) -> Result<String, ExportError> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        writer.write_record(CSV_HEADER)?;
        for record in records {
            writer.serialize(CsvRecord {
                table: record.table.clone(),
                status: record.status,
                source_count: record.source_count,
                target_count: record.target_count,
                details: record.details.clone(),
            })?;
        }
        let bytes = writer.into_inner().map_err(|e| e.into_error())?;
        String::from_utf8(bytes)
            .map_err(|e| ExportError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
    }

    pub fn import_csv(csv_text: &str) -> Result<Vec<DiffRecord>, ExportError> {
        let mut reader = csv::Reader::from_reader(csv_text.as_bytes());
        let headers = reader.headers()?.clone();
        if headers.iter().ne(CSV_HEADER.iter().copied()) {
            return Err(ExportError::Header(headers.iter().collect::<Vec<_>>().join(",")));
        }

        reader
            .deserialize::<CsvRecord>()
            .map(|row| {
                let row = row?;
                Ok(DiffRecord {
                    table: row.table,
                    category: None,
                    status: row.status,
                    source_count: row.source_count,
                    target_count: row.target_count,
                    details: row.details,
                })
            })
            .collect()
    }

    /// Write records to `path`, choosing the format from its extension
    pub fn write_to_file(records: &[DiffRecord], path: &Path) -> Result<(), ExportError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let contents = match extension.as_str() {
            "json" => Self::export_as_json(records)?,
            "csv" => Self::export_as_csv(records)?,
            other => return Err(ExportError::UnsupportedFormat(other.to_string())),
        };
        std::fs::write(path, contents)?;
        log::info!("Exported {} diff records to {}", records.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::types::{FieldChange, FieldChangeKind, ObjectCategory, ObjectId};

    fn sample() -> Vec<DiffRecord> {
        vec![
            DiffRecord {
                table: "npcs".into(),
                category: Some("table".into()),
                status: DiffStatus::Modified,
                source_count: Some(4),
                target_count: Some(3),
                details: "hp: type=INTEGER -> type=TEXT; element: added".into(),
            },
            DiffRecord {
                table: "monster_resources".into(),
                category: Some("data".into()),
                status: DiffStatus::Match,
                source_count: Some(120),
                target_count: Some(120),
                details: "matched=120 added=0 removed=0 modified=0".into(),
            },
            DiffRecord {
                table: "boss_list".into(),
                category: Some("view".into()),
                status: DiffStatus::Added,
                source_count: Some(1),
                target_count: None,
                details: "quoted, \"commas\"\nand newlines".into(),
            },
        ]
    }

    fn without_category(records: &[DiffRecord]) -> Vec<DiffRecord> {
        records
            .iter()
            .cloned()
            .map(|r| DiffRecord { category: None, ..r })
            .collect()
    }

    #[test]
    fn test_json_then_csv_preserves_shared_fields() {
        let records = sample();

        let json = DiffExporter::export_as_json(&records).unwrap();
        let from_json = DiffExporter::import_json(&json).unwrap();
        assert_eq!(from_json, records);

        let csv_text = DiffExporter::export_as_csv(&from_json).unwrap();
        let from_csv = DiffExporter::import_csv(&csv_text).unwrap();
        assert_eq!(from_csv, without_category(&records));
    }

    #[test]
    fn test_csv_then_json_preserves_shared_fields() {
        let records = without_category(&sample());

        let csv_text = DiffExporter::export_as_csv(&records).unwrap();
        let json = DiffExporter::export_as_json(&DiffExporter::import_csv(&csv_text).unwrap()).unwrap();
        assert_eq!(DiffExporter::import_json(&json).unwrap(), records);
    }

    #[test]
    fn test_csv_header_row() {
        let csv_text = DiffExporter::export_as_csv(&sample()).unwrap();
        assert_eq!(
            csv_text.lines().next(),
            Some("table,status,sourceCount,targetCount,details")
        );
    }

    #[test]
    fn test_json_field_names() {
        let json = DiffExporter::export_as_json(&sample()[..1]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["sourceCount"], serde_json::json!(4));
        assert_eq!(value[0]["status"], serde_json::json!("modified"));
        assert_eq!(value[0]["category"], serde_json::json!("table"));
    }

    #[test]
    fn test_import_csv_rejects_wrong_header() {
        let result = DiffExporter::import_csv("name,status\nnpcs,match\n");
        assert!(matches!(result, Err(ExportError::Header(_))));
    }

    #[test]
    fn test_record_from_schema_entry() {
        let entry = SchemaDiffEntry {
            object: ObjectId::new(ObjectCategory::Table, "monsters"),
            status: DiffStatus::Modified,
            source: None,
            target: None,
            changes: vec![FieldChange {
                item: "element".into(),
                kind: FieldChangeKind::Added,
                source: Some("type=TEXT".into()),
                target: None,
            }],
            error: None,
        };

        let record = DiffRecord::from(&entry);
        assert_eq!(record.table, "monsters");
        assert_eq!(record.category.as_deref(), Some("table"));
        assert_eq!(record.details, "element: added");
    }

    #[test]
    fn test_record_from_failed_data_result() {
        let result = DataComparisonResult::failed("items", "snapshot 'prod' unreachable");
        let record = DiffRecord::from(&result);
        assert_eq!(record.status, DiffStatus::Error);
        assert_eq!(record.source_count, None);
        assert_eq!(record.details, "snapshot 'prod' unreachable");
    }

    #[test]
    fn test_write_to_file_by_extension() {
        let dir = std::env::temp_dir().join(format!("realmsync-export-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();

        let csv_path = dir.join("diff.csv");
        DiffExporter::write_to_file(&sample(), &csv_path).unwrap();
        let text = std::fs::read_to_string(&csv_path).unwrap();
        assert_eq!(DiffExporter::import_csv(&text).unwrap().len(), 3);

        let bad = DiffExporter::write_to_file(&sample(), &dir.join("diff.xml"));
        assert!(matches!(bad, Err(ExportError::UnsupportedFormat(_))));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}

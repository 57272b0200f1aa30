//! Schema inspector: turns raw catalog objects into comparable descriptors
//!
//! Comparison always runs on normalized definitions so that formatting
//! differences (whitespace, comments, keyword case) never show up as
//! modifications.

use once_cell::sync::Lazy;
use regex::Regex;

use super::types::{DefinitionItem, ObjectCategory, SchemaObjectDescriptor};
use crate::snapshot::RawSchemaObject;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static PUNCT_SPACING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*([(),])\s*").expect("valid regex"));

/// Normalize a SQL fragment for comparison
///
/// Comments are removed, whitespace collapsed, whitespace around
/// punctuation dropped and everything outside quotes lower-cased.
pub fn normalize_sql(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut pending_space = false;

    fn is_punct(c: char) -> bool {
        matches!(
            c,
            '(' | ')' | ',' | ';' | '.' | '=' | '<' | '>' | '!' | '+' | '-' | '*' | '/' | '%' | '|' | '&'
        )
    }

    fn push_separated(out: &mut String, pending_space: &mut bool, c: char) {
        if *pending_space {
            if let Some(last) = out.chars().last() {
                if !is_punct(last) && !is_punct(c) {
                    out.push(' ');
                }
            }
        }
        *pending_space = false;
    }

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                push_separated(&mut out, &mut pending_space, c);
                out.push(c);
                while let Some(inner) = chars.next() {
                    out.push(inner);
                    if inner == c {
                        // Doubled quote is an escaped quote, keep scanning
                        if chars.peek() == Some(&c) {
                            if let Some(escaped) = chars.next() {
                                out.push(escaped);
                            }
                            continue;
                        }
                        break;
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        break;
                    }
                }
                pending_space = true;
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for skipped in chars.by_ref() {
                    if prev == '*' && skipped == '/' {
                        break;
                    }
                    prev = skipped;
                }
                pending_space = true;
            }
            c if c.is_whitespace() => pending_space = true,
            c => {
                push_separated(&mut out, &mut pending_space, c);
                out.push(c.to_ascii_lowercase());
            }
        }
    }

    out.trim_end_matches([';', ' ']).to_string()
}

/// Canonical spelling of a column type
pub fn normalize_type(data_type: &str) -> String {
    let collapsed = WHITESPACE.replace_all(data_type.trim(), " ");
    PUNCT_SPACING
        .replace_all(&collapsed, "$1")
        .to_ascii_uppercase()
}

/// Expressions of every `CHECK (...)` clause in a normalized table definition
pub fn check_clauses(normalized: &str) -> Vec<String> {
    let mut clauses = Vec::new();
    let mut quote: Option<char> = None;
    let mut prev = ' ';

    for (pos, c) in normalized.char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
        } else if matches!(c, '\'' | '"' | '`') {
            quote = Some(c);
        } else if !(prev.is_alphanumeric() || prev == '_') && normalized[pos..].starts_with("check(") {
            let body = &normalized[pos + "check(".len()..];
            if let Some(end) = closing_paren(body) {
                clauses.push(body[..end].to_string());
            }
        }
        prev = c;
    }
    clauses
}

/// Byte offset of the paren closing an already opened group
fn closing_paren(body: &str) -> Option<usize> {
    let mut depth = 1usize;
    let mut quote: Option<char> = None;
    for (pos, c) in body.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"' | '`') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => {
                depth -= 1;
                if depth == 0 {
                    return Some(pos);
                }
            }
            _ => {}
        }
    }
    None
}

/// Build a normalized descriptor from a raw catalog object
pub fn describe(raw: &RawSchemaObject) -> SchemaObjectDescriptor {
    let mut definition = Vec::new();

    if let Some(owner) = &raw.owner {
        definition.push(DefinitionItem::new("@on").with_attr("table", owner.to_ascii_lowercase()));
    }

    match raw.id.category {
        ObjectCategory::Table => {
            for column in &raw.columns {
                let mut item = DefinitionItem::new(column.name.clone())
                    .with_attr("type", normalize_type(&column.data_type))
                    .with_attr("not_null", column.not_null.to_string());
                if let Some(default) = &column.default {
                    item = item.with_attr("default", normalize_sql(default));
                }
                if column.primary_key > 0 {
                    item = item.with_attr("primary_key", column.primary_key.to_string());
                }
                definition.push(item);
            }
            for key in &raw.unique_keys {
                let columns = key.join(",").to_ascii_lowercase();
                definition.push(DefinitionItem::new(format!("@unique({})", columns)).with_attr("kind", "unique"));
            }
            if let Some(sql) = &raw.sql {
                for clause in check_clauses(&normalize_sql(sql)) {
                    definition.push(DefinitionItem::new(format!("@check({})", clause)).with_attr("kind", "check"));
                }
            }
        }
        ObjectCategory::Index => {
            for column in &raw.columns {
                definition.push(DefinitionItem::new(column.name.clone()).with_attr("kind", "column"));
            }
            if let Some(sql) = &raw.sql {
                definition.push(DefinitionItem::new("@definition").with_attr("sql", normalize_sql(sql)));
            }
        }
        ObjectCategory::Constraint => {
            for reference in &raw.references {
                definition.push(
                    DefinitionItem::new(reference.from_column.clone())
                        .with_attr("references", format!("{}.{}", reference.to_table, reference.to_column))
                        .with_attr("on_update", reference.on_update.to_ascii_uppercase())
                        .with_attr("on_delete", reference.on_delete.to_ascii_uppercase()),
                );
            }
            if let Some(sql) = &raw.sql {
                definition.push(DefinitionItem::new("@definition").with_attr("sql", normalize_sql(sql)));
            }
        }
        ObjectCategory::View | ObjectCategory::Trigger | ObjectCategory::Function => {
            if let Some(sql) = &raw.sql {
                definition.push(DefinitionItem::new("@definition").with_attr("sql", normalize_sql(sql)));
            }
        }
    }

    let checksum = checksum(raw.id.category, &raw.id.name, &definition);

    SchemaObjectDescriptor {
        category: raw.id.category,
        name: raw.id.name.clone(),
        definition,
        checksum,
    }
}

/// blake3 digest over the canonical encoding of a definition
pub fn checksum(category: ObjectCategory, name: &str, definition: &[DefinitionItem]) -> String {
    fn write_str(hasher: &mut blake3::Hasher, s: &str) {
        hasher.update(&(s.len() as u64).to_le_bytes());
        hasher.update(s.as_bytes());
    }

    let mut hasher = blake3::Hasher::new();
    write_str(&mut hasher, category.label());
    write_str(&mut hasher, name);
    for item in definition {
        write_str(&mut hasher, &item.name);
        hasher.update(&(item.attributes.len() as u64).to_le_bytes());
        for (key, value) in &item.attributes {
            write_str(&mut hasher, key);
            write_str(&mut hasher, value);
        }
    }
    hasher.finalize().to_hex().to_string()
}

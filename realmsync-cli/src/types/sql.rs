//! SQL text helpers

/// Quote an identifier for SQLite/ANSI SQL
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

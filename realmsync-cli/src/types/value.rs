//! Column value representation shared by the comparison and promotion paths

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A single column value as stored in a game database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Boolean flag
    Bool(bool),
    /// Whole number (ids, counters, enum codes)
    Int(i64),
    /// Floating point (rates, multipliers)
    Float(f64),
    /// Text value
    Text(String),
    /// Raw bytes
    Blob(Vec<u8>),
}

impl Value {
    /// Check if this value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to get as string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as integer
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Try to get as float
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(*b as i64 as f64),
            _ => None,
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(self, Value::Bool(_) | Value::Int(_) | Value::Float(_))
    }

    /// Storage class rank, following SQLite's cross-type ordering
    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) | Value::Int(_) | Value::Float(_) => 1,
            Value::Text(_) => 2,
            Value::Blob(_) => 3,
        }
    }

    /// Total order over values: null < numbers < text < blob
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match self.rank().cmp(&other.rank()) {
            Ordering::Equal => {}
            unequal => return unequal,
        }

        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
            (a, b) => match (a.as_int(), b.as_int()) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => {
                    let x = a.as_float().unwrap_or(f64::NAN);
                    let y = b.as_float().unwrap_or(f64::NAN);
                    x.total_cmp(&y)
                }
            },
        }
    }

    /// Numeric-aware equality: `Int(3)` is the same value as `Float(3.0)`
    pub fn same_as(&self, other: &Value) -> bool {
        if self.is_numeric() && other.is_numeric() {
            return self.total_cmp(other) == Ordering::Equal;
        }
        self == other
    }

    /// Canonical byte encoding, used for row checksums
    pub fn write_canonical(&self, hasher: &mut blake3::Hasher) {
        match self {
            Value::Null => {
                hasher.update(b"n");
            }
            Value::Bool(b) => {
                hasher.update(b"i");
                hasher.update(&(*b as i64).to_le_bytes());
            }
            Value::Int(i) => {
                hasher.update(b"i");
                hasher.update(&i.to_le_bytes());
            }
            Value::Float(f) => {
                // Integral floats hash like the equivalent integer
                if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                    hasher.update(b"i");
                    hasher.update(&(*f as i64).to_le_bytes());
                } else {
                    hasher.update(b"f");
                    hasher.update(&f.to_le_bytes());
                }
            }
            Value::Text(s) => {
                hasher.update(b"t");
                hasher.update(&(s.len() as u64).to_le_bytes());
                hasher.update(s.as_bytes());
            }
            Value::Blob(bytes) => {
                hasher.update(b"b");
                hasher.update(&(bytes.len() as u64).to_le_bytes());
                hasher.update(bytes);
            }
        }
    }

    /// Render as a SQL literal for preview scripts
    pub fn to_sql_literal(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => {
                if f.is_finite() {
                    format!("{:?}", f)
                } else {
                    "NULL".to_string()
                }
            }
            Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Value::Blob(bytes) => {
                let hex: String = bytes.iter().map(|b| format!("{:02X}", b)).collect();
                format!("X'{}'", hex)
            }
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "(null)"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::Text(s) => write!(f, "{}", s),
            Value::Blob(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

/// Primary key of a row; composite keys hold one value per key column
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowKey(pub Vec<Value>);

impl RowKey {
    pub fn single(value: impl Into<Value>) -> Self {
        RowKey(vec![value.into()])
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }
}

impl PartialEq for RowKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RowKey {}

impl PartialOrd for RowKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RowKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            match a.total_cmp(b) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

impl std::fmt::Display for RowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|v| v.to_string()).collect();
        if parts.len() == 1 {
            write!(f, "{}", parts[0])
        } else {
            write!(f, "({})", parts.join(", "))
        }
    }
}

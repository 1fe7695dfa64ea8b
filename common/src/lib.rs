//! A library with common utilities for importing and querying the book awards dataset.

pub mod catalog;
pub mod dataset;
pub mod db_util;
pub mod export;
pub mod join_rank;
pub mod number_stats;

use clap::ValueEnum;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

pub const DEFAULT_DATASET_PATH: &str = "Libros_Grupo8.json";
pub const DEFAULT_TOP_K: usize = 1;
pub const DEFAULT_KEY_FIELD: &str = "_id";
pub const DEFAULT_NAME_FIELD: &str = "nombre";
pub const DEFAULT_GENRE: &str = "Misterio";
pub const DEFAULT_LANGUAGE: &str = "Español";

/// A single record as stored in a collection: field name to JSON value.
pub type Document = Map<String, Value>;

/// Each output format the query runner supports.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Console,
    Csv,
    Json,
}

/// A scalar value used as a join key, keeping its JSON type.
///
/// Integers and integral floats share a key (`6` and `6.0` join), but the
/// string `"6"` and the number `6` never do, the same as filter equality.
/// Empty strings, `null`, arrays and objects are not keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKey {
    Text(String),
    /// Canonical decimal text of the number.
    Number(String),
    Bool(bool),
}

impl RecordKey {
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(Self::Text(s.clone())),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Self::Number(i.to_string()))
                } else if let Some(u) = n.as_u64() {
                    Some(Self::Number(u.to_string()))
                } else {
                    let f = n.as_f64()?;
                    if f.fract() == 0.0 && f.abs() < 9.0e15 {
                        Some(Self::Number((f as i64).to_string()))
                    } else {
                        Some(Self::Number(f.to_string()))
                    }
                }
            }
            Value::Bool(b) => Some(Self::Bool(*b)),
            _ => None,
        }
    }
}

impl From<&str> for RecordKey {
    fn from(key: &str) -> Self {
        Self::Text(key.to_string())
    }
}

impl From<i64> for RecordKey {
    fn from(key: i64) -> Self {
        Self::Number(key.to_string())
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Text(s) => write!(f, "{s:?}"),
            RecordKey::Number(n) => f.write_str(n),
            RecordKey::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// The value computed for one result row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Metric {
    Count(u64),
    Mean(f64),
}

impl Metric {
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(self) -> f64 {
        match self {
            Metric::Count(n) => n as f64,
            Metric::Mean(m) => m,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Count(n) => write!(f, "{n}"),
            // integral means keep a trailing `.0`, as in the JSON output
            Metric::Mean(m) if m.fract() == 0.0 => write!(f, "{m:.1}"),
            Metric::Mean(m) => write!(f, "{m}"),
        }
    }
}

/// A lookup display name joined with its metric.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub name: String,
    pub metric: Metric,
}

/// The tabular result of a query: two named columns, rows sorted by metric.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name_column: String,
    pub metric_column: String,
    pub rows: Vec<ResultRow>,
}

impl Table {
    /// One flat record per row, keyed by the column names.
    pub fn records(&self) -> Vec<Document> {
        self.rows
            .iter()
            .map(|row| {
                let mut record = Document::new();
                record.insert(self.name_column.clone(), Value::from(row.name.clone()));
                let metric = match row.metric {
                    Metric::Count(n) => Value::from(n),
                    Metric::Mean(m) => Value::from(m),
                };
                record.insert(self.metric_column.clone(), metric);
                record
            })
            .collect()
    }
}

impl Serialize for Table {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.records().serialize(serializer)
    }
}

/// The result of running one query.
///
/// `Found` always holds at least one row. `EmptyResult` means nothing matched;
/// `CategoryNotFound` means the category name the query depends on does not
/// exist in its lookup collection at all.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum QueryOutcome {
    Found(Table),
    EmptyResult,
    CategoryNotFound { collection: String, name: String },
}

impl QueryOutcome {
    pub fn table(&self) -> Option<&Table> {
        match self {
            QueryOutcome::Found(table) => Some(table),
            _ => None,
        }
    }

    pub fn is_category_not_found(&self) -> bool {
        matches!(self, QueryOutcome::CategoryNotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test_log::test]
    fn test_record_key_normalizes_numbers() {
        assert_eq!(RecordKey::from_value(&json!(6)), Some(RecordKey::from(6)));
        assert_eq!(RecordKey::from_value(&json!(6.0)), Some(RecordKey::from(6)));
        assert_eq!(
            RecordKey::from_value(&json!(2.5)),
            Some(RecordKey::Number("2.5".to_string()))
        );
        assert_eq!(
            RecordKey::from_value(&json!("es")),
            Some(RecordKey::from("es"))
        );
    }

    #[test_log::test]
    fn test_record_key_keeps_json_type() {
        assert_ne!(
            RecordKey::from_value(&json!("6")),
            RecordKey::from_value(&json!(6))
        );
        assert_ne!(
            RecordKey::from_value(&json!("true")),
            RecordKey::from_value(&json!(true))
        );
        assert_eq!(RecordKey::from("6").to_string(), "\"6\"");
        assert_eq!(RecordKey::from(6).to_string(), "6");
    }

    #[test_log::test]
    fn test_record_key_rejects_non_scalars() {
        assert_eq!(RecordKey::from_value(&Value::Null), None);
        assert_eq!(RecordKey::from_value(&json!("")), None);
        assert_eq!(RecordKey::from_value(&json!([1, 2])), None);
        assert_eq!(RecordKey::from_value(&json!({"a": 1})), None);
    }

    #[test_log::test]
    fn test_outcome_serializes_with_status_tag() {
        let table = Table {
            name_column: "nombre_genero".to_string(),
            metric_column: "total".to_string(),
            rows: vec![ResultRow {
                name: "Misterio".to_string(),
                metric: Metric::Count(2),
            }],
        };
        let found = serde_json::to_value(QueryOutcome::Found(table)).unwrap();
        assert_eq!(
            found,
            json!({"status": "found", "data": [{"nombre_genero": "Misterio", "total": 2}]})
        );

        let empty = serde_json::to_value(QueryOutcome::EmptyResult).unwrap();
        assert_eq!(empty, json!({"status": "empty_result"}));

        let missing = serde_json::to_value(QueryOutcome::CategoryNotFound {
            collection: "generos".to_string(),
            name: "Distopía".to_string(),
        })
        .unwrap();
        assert_eq!(
            missing,
            json!({"status": "category_not_found", "data": {"collection": "generos", "name": "Distopía"}})
        );
    }

    #[test_log::test]
    fn test_metric_display() {
        assert_eq!(Metric::Count(3).to_string(), "3");
        assert_eq!(Metric::Mean(312.456).to_string(), "312.456");
        assert_eq!(Metric::Mean(300.0).to_string(), "300.0");
    }
}

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One fetch result for one subject at one point in time.
///
/// Snapshots are produced by a data source, cached behind an `Arc`, and
/// read by the rule evaluator. They are never mutated after construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    /// The monitored entity (e.g. a city name).
    pub subject: String,
    /// Identifier of the source that produced this snapshot.
    pub source: String,
    pub observed_at: DateTime<Utc>,
    pub fields: BTreeMap<String, FieldValue>,
}

impl Snapshot {
    /// Create an empty snapshot observed now.
    pub fn new(subject: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            source: source.into(),
            observed_at: Utc::now(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter, used by sources while assembling a result.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}

/// Typed field values.
///
/// Serialized untagged so templates and JSON payloads see plain values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    Boolean(bool),
    Number(f64),
    Text(String),
    List(Vec<FieldValue>),
}

impl FieldValue {
    /// Extract as a number, returning None for anything non-numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Extract as string, returning None for non-text values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// All numeric values carried by this field.
    ///
    /// A scalar number yields one element; a list yields its numeric
    /// elements in order; everything else yields nothing.
    pub fn numbers(&self) -> Vec<f64> {
        match self {
            FieldValue::Number(n) => vec![*n],
            FieldValue::List(items) => items.iter().filter_map(FieldValue::as_f64).collect(),
            _ => Vec::new(),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Number(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Number(v as f64)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Boolean(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<Vec<f64>> for FieldValue {
    fn from(v: Vec<f64>) -> Self {
        FieldValue::List(v.into_iter().map(FieldValue::Number).collect())
    }
}

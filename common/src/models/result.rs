//! Probe result models.

use std::collections::BTreeMap;

use serde::Serialize;

/// A scalar value read from a result column.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    /// Renders the value the way it is stored as a tag.
    ///
    /// NULL renders as an empty string.
    pub fn to_tag(&self) -> String {
        match self {
            FieldValue::Null => String::new(),
            other => other.to_string(),
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Null => write!(f, "NULL"),
            FieldValue::Bool(v) => write!(f, "{}", v),
            FieldValue::Int(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
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

/// Fields and tags classified from one result row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchResult {
    pub fields: BTreeMap<String, FieldValue>,
    pub tags: BTreeMap<String, String>,
}

/// One point ready for dispatch.
///
/// Maps are ordered by name, which is the order used by the INSERT template
/// expander and the line protocol encoder.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TestResult {
    pub measurement: String,
    pub fields: BTreeMap<String, FieldValue>,
    pub tags: BTreeMap<String, String>,
}

impl TestResult {
    /// Creates a result for `measurement` from a classified row.
    pub fn from_fetch(measurement: impl Into<String>, fetched: FetchResult) -> Self {
        Self {
            measurement: measurement.into(),
            fields: fetched.fields,
            tags: fetched.tags,
        }
    }
}

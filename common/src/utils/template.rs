//! INSERT template expansion.
//!
//! A target database's `insert_sql` is split into literal text and `{...}`
//! placeholders. Expanding it against one [`TestResult`] yields SQL text with
//! bind markers plus the values to bind, in marker order.
//!
//! ```text
//! INSERT INTO {MEASUREMENT_NAME} (ts,{FIELDNAMES},{TAGNAMES}) VALUES (now(),{FIELDVALUES},{TAGVALUES})
//! ```
//!
//! Unknown placeholders are copied through as literal SQL.

use crate::errors::AppResult;
use crate::models::{Driver, FieldValue, TestResult};

/// Bind marker syntax of the target driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerStyle {
    /// `$1`, `$2`, ... (PostgreSQL, SQLite).
    Numbered,
    /// `?` (MySQL).
    Positional,
}

impl From<Driver> for MarkerStyle {
    fn from(driver: Driver) -> Self {
        match driver {
            Driver::MySql => MarkerStyle::Positional,
            Driver::Postgres | Driver::Sqlite => MarkerStyle::Numbered,
        }
    }
}

/// A value bound to a statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(serde_json::Value),
}

impl From<&FieldValue> for SqlParam {
    fn from(value: &FieldValue) -> Self {
        match value {
            FieldValue::Null => SqlParam::Null,
            FieldValue::Bool(v) => SqlParam::Bool(*v),
            FieldValue::Int(v) => SqlParam::Int(*v),
            FieldValue::Float(v) => SqlParam::Float(*v),
            FieldValue::Text(v) => SqlParam::Text(v.clone()),
        }
    }
}

impl From<&str> for SqlParam {
    fn from(value: &str) -> Self {
        SqlParam::Text(value.to_string())
    }
}

/// One piece of a tokenized template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    Literal(&'a str),
    /// Placeholder text including the braces.
    Placeholder(&'a str),
}

/// Expanded statement and its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Expansion {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

/// Splits a template into literal and placeholder tokens.
///
/// A placeholder is `{` followed by at least one character other than a
/// brace, then `}`. Matching is left to right and non-overlapping.
pub fn tokenize(template: &str) -> Vec<Token<'_>> {
    let bytes = template.as_bytes();
    let mut tokens = Vec::new();
    let mut literal_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'{' {
            i += 1;
            continue;
        }
        let mut j = i + 1;
        while j < bytes.len() && bytes[j] != b'{' && bytes[j] != b'}' {
            j += 1;
        }
        if j < bytes.len() && bytes[j] == b'}' && j > i + 1 {
            if i > literal_start {
                tokens.push(Token::Literal(&template[literal_start..i]));
            }
            tokens.push(Token::Placeholder(&template[i..=j]));
            i = j + 1;
            literal_start = i;
        } else {
            i += 1;
        }
    }

    if literal_start < template.len() {
        tokens.push(Token::Literal(&template[literal_start..]));
    }
    tokens
}

/// Placeholders understood by the expander.
#[derive(Debug, PartialEq, Eq)]
enum Placeholder<'a> {
    Measurement,
    MeasurementName,
    FieldNames,
    TagNames,
    FieldValues,
    TagValues,
    FieldsJson,
    TagsJson,
    FieldsRaw,
    TagsRaw,
    Field(&'a str),
    Tag(&'a str),
}

impl<'a> Placeholder<'a> {
    fn parse(token: &'a str) -> Option<Self> {
        let placeholder = match token {
            "{MEASUREMENT}" => Placeholder::Measurement,
            "{MEASUREMENT_NAME}" => Placeholder::MeasurementName,
            "{FIELDNAMES}" => Placeholder::FieldNames,
            "{TAGNAMES}" => Placeholder::TagNames,
            "{FIELDVALUES}" => Placeholder::FieldValues,
            "{TAGVALUES}" => Placeholder::TagValues,
            "{FIELDS_JSON}" => Placeholder::FieldsJson,
            "{TAGS_JSON}" => Placeholder::TagsJson,
            "{FIELDS_RAW}" => Placeholder::FieldsRaw,
            "{TAGS_RAW}" => Placeholder::TagsRaw,
            _ => {
                if let Some(name) = indexed(token, "{FIELDS[") {
                    Placeholder::Field(name)
                } else if let Some(name) = indexed(token, "{TAGS[") {
                    Placeholder::Tag(name)
                } else {
                    return None;
                }
            }
        };
        Some(placeholder)
    }
}

/// Extracts `name` from `{PREFIX[name]}`.
fn indexed<'a>(token: &'a str, prefix: &str) -> Option<&'a str> {
    let name = token.strip_prefix(prefix)?.strip_suffix("]}")?;
    if name.is_empty() || name.contains(['[', ']']) {
        return None;
    }
    Some(name)
}

struct Builder {
    style: MarkerStyle,
    sql: String,
    params: Vec<SqlParam>,
}

impl Builder {
    fn push_param(&mut self, value: SqlParam) {
        self.params.push(value);
        match self.style {
            MarkerStyle::Numbered => {
                self.sql.push('$');
                self.sql.push_str(&self.params.len().to_string());
            }
            MarkerStyle::Positional => self.sql.push('?'),
        }
    }

    fn push_params(&mut self, values: impl IntoIterator<Item = SqlParam>) {
        for (i, value) in values.into_iter().enumerate() {
            if i > 0 {
                self.sql.push(',');
            }
            self.push_param(value);
        }
    }
}

/// Expands `template` against one result.
///
/// Field and tag lists are emitted in name order.
pub fn expand(template: &str, result: &TestResult, style: MarkerStyle) -> AppResult<Expansion> {
    let mut out = Builder {
        style,
        sql: String::with_capacity(template.len()),
        params: Vec::new(),
    };

    for token in tokenize(template) {
        let text = match token {
            Token::Literal(text) => {
                out.sql.push_str(text);
                continue;
            }
            Token::Placeholder(text) => text,
        };
        let Some(placeholder) = Placeholder::parse(text) else {
            out.sql.push_str(text);
            continue;
        };

        match placeholder {
            Placeholder::Measurement => out.push_param(result.measurement.as_str().into()),
            Placeholder::MeasurementName => out.sql.push_str(&result.measurement),
            Placeholder::FieldNames => {
                let names: Vec<&str> = result.fields.keys().map(String::as_str).collect();
                out.sql.push_str(&names.join(","));
            }
            Placeholder::TagNames => {
                let names: Vec<&str> = result.tags.keys().map(String::as_str).collect();
                out.sql.push_str(&names.join(","));
            }
            Placeholder::FieldValues => out.push_params(result.fields.values().map(SqlParam::from)),
            Placeholder::TagValues => {
                out.push_params(result.tags.values().map(|v| SqlParam::from(v.as_str())))
            }
            Placeholder::FieldsJson => {
                out.push_param(SqlParam::Text(serde_json::to_string(&result.fields)?))
            }
            Placeholder::TagsJson => {
                out.push_param(SqlParam::Text(serde_json::to_string(&result.tags)?))
            }
            Placeholder::FieldsRaw => {
                out.push_param(SqlParam::Json(serde_json::to_value(&result.fields)?))
            }
            Placeholder::TagsRaw => {
                out.push_param(SqlParam::Json(serde_json::to_value(&result.tags)?))
            }
            Placeholder::Field(name) => {
                let value = result
                    .fields
                    .get(name)
                    .map(SqlParam::from)
                    .unwrap_or(SqlParam::Null);
                out.push_param(value);
            }
            Placeholder::Tag(name) => {
                let value = result.tags.get(name).map(String::as_str).unwrap_or("");
                out.push_param(value.into());
            }
        }
    }

    Ok(Expansion {
        sql: out.sql,
        params: out.params,
    })
}

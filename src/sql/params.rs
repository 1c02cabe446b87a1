//! Named-parameter translation.
//!
//! Callers write SQL templates with `:name` (or `@name`) placeholders and
//! supply a name-to-value mapping. Each backend consumes a different
//! placeholder syntax, so the template is rewritten before execution:
//!
//! - MySQL: `?` per occurrence, values in occurrence order
//! - PostgreSQL: `$1..$n` per occurrence, values in occurrence order
//! - SQLite: markers kept as native `:name`, values in first-appearance
//!   order, one per distinct name
//!
//! The scanner consumes the longest identifier after a marker, so a short
//! parameter name can never match as a prefix of a longer one (`:id` vs
//! `:identifier`). Mapping entries that never appear in the template are
//! ignored; markers with no mapping entry are left untouched for the
//! backend to report. String literals, quoted identifiers, comments and
//! PostgreSQL `::` casts are never rewritten.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::sqlite::SqliteArguments;
use sqlx::types::Json;
use sqlx::{MySql, Postgres, Sqlite};
use std::collections::HashMap;

/// A value bound to a query placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Bool(bool),
    /// Stored as i64 for maximum range
    Int(i64),
    Float(f64),
    Text(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
    Json(JsonValue),
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for ParamValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Name-to-value mapping for a query template.
pub type NamedParams = HashMap<String, ParamValue>;

/// Placeholder syntax a backend understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `$1..$n` (PostgreSQL)
    Numbered,
    /// `?` (MySQL)
    Positional,
    /// Native `:name` markers (SQLite)
    Named,
}

/// A template rewritten for one backend plus its ordered bind values.
#[derive(Debug, Clone)]
pub struct BoundQuery {
    pub sql: String,
    pub values: Vec<ParamValue>,
}

/// Rewrite a named-parameter template into the given placeholder style.
pub fn translate(sql: &str, params: &NamedParams, style: PlaceholderStyle) -> BoundQuery {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut values: Vec<ParamValue> = Vec::new();
    // Named style: one value per distinct name, in first-appearance order.
    let mut named_order: Vec<String> = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;

        match c {
            '\'' => {
                let end = skip_quoted(bytes, i, b'\'');
                out.push_str(&sql[i..end]);
                i = end;
            }
            '"' => {
                let end = skip_quoted(bytes, i, b'"');
                out.push_str(&sql[i..end]);
                i = end;
            }
            '-' if bytes.get(i + 1) == Some(&b'-') => {
                let end = bytes[i..]
                    .iter()
                    .position(|&b| b == b'\n')
                    .map_or(bytes.len(), |p| i + p + 1);
                out.push_str(&sql[i..end]);
                i = end;
            }
            '/' if bytes.get(i + 1) == Some(&b'*') => {
                let end = sql[i + 2..]
                    .find("*/")
                    .map_or(bytes.len(), |p| i + 2 + p + 2);
                out.push_str(&sql[i..end]);
                i = end;
            }
            ':' if bytes.get(i + 1) == Some(&b':') => {
                // PostgreSQL cast, not a parameter
                out.push_str("::");
                i += 2;
            }
            '@' if bytes.get(i + 1) == Some(&b'@') => {
                // server variable, not a parameter
                out.push_str("@@");
                i += 2;
            }
            ':' | '@' => {
                let name_end = scan_identifier(bytes, i + 1);
                let name = &sql[i + 1..name_end];
                if !name.is_empty() && params.contains_key(name) {
                    let value = params[name].clone();
                    match style {
                        PlaceholderStyle::Positional => {
                            values.push(value);
                            out.push('?');
                        }
                        PlaceholderStyle::Numbered => {
                            values.push(value);
                            out.push_str(&format!("${}", values.len()));
                        }
                        PlaceholderStyle::Named => {
                            if !named_order.iter().any(|n| n == name) {
                                named_order.push(name.to_string());
                                values.push(value);
                            }
                            out.push(':');
                            out.push_str(name);
                        }
                    }
                } else {
                    out.push_str(&sql[i..name_end]);
                }
                i = name_end;
            }
            _ => {
                // c is only trustworthy for ASCII; take the real char width
                let ch_len = sql[i..].chars().next().map_or(1, |ch| ch.len_utf8());
                out.push_str(&sql[i..i + ch_len]);
                i += ch_len;
            }
        }
    }

    BoundQuery { sql: out, values }
}

/// End index (exclusive) of a quoted region starting at `start`, honoring
/// doubled-quote escapes.
fn skip_quoted(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// End index (exclusive) of an identifier run starting at `start`.
fn scan_identifier(bytes: &[u8], start: usize) -> usize {
    let mut i = start;
    if i < bytes.len() && (bytes[i].is_ascii_alphabetic() || bytes[i] == b'_') {
        i += 1;
        while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
            i += 1;
        }
    }
    i
}

// Parameter binding, one function per backend (the type parameters differ).

pub(crate) fn bind_mysql<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    value: &'q ParamValue,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match value {
        ParamValue::Null => query.bind(None::<String>),
        ParamValue::Bool(v) => query.bind(*v),
        ParamValue::Int(v) => query.bind(*v),
        ParamValue::Float(v) => query.bind(*v),
        ParamValue::Text(v) => query.bind(v.as_str()),
        ParamValue::Bytes(v) => query.bind(v.as_slice()),
        ParamValue::Json(v) => query.bind(Json(v)),
    }
}

pub(crate) fn bind_postgres<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    value: &'q ParamValue,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match value {
        ParamValue::Null => query.bind(None::<String>),
        ParamValue::Bool(v) => query.bind(*v),
        ParamValue::Int(v) => query.bind(*v),
        ParamValue::Float(v) => query.bind(*v),
        ParamValue::Text(v) => query.bind(v.as_str()),
        ParamValue::Bytes(v) => query.bind(v.as_slice()),
        ParamValue::Json(v) => query.bind(Json(v)),
    }
}

pub(crate) fn bind_sqlite<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &'q ParamValue,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        ParamValue::Null => query.bind(None::<String>),
        ParamValue::Bool(v) => query.bind(*v),
        ParamValue::Int(v) => query.bind(*v),
        ParamValue::Float(v) => query.bind(*v),
        ParamValue::Text(v) => query.bind(v.as_str()),
        ParamValue::Bytes(v) => query.bind(v.as_slice()),
        // SQLite has no JSON type, store as text
        ParamValue::Json(v) => query.bind(v.to_string()),
    }
}

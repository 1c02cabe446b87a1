//! Result normalization.
//!
//! Each backend returns its own native row type; the adapters here fold all
//! three into one [`QueryResult`] shape: ordered JSON object rows, a row
//! count, and optional field descriptors.
//!
//! Column decoding is two-phase: the column's reported type name is
//! classified into a [`ColumnKind`], then a backend-specific decoder
//! extracts the value for that kind. DECIMAL/NUMERIC columns are preserved
//! as strings to avoid precision loss, binary columns are base64 encoded,
//! and date/time columns come back as formatted strings.

use crate::config::BackendType;
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row as SqlxRow, Type, TypeInfo};

/// One result row: column name to JSON value, in column order.
pub type Row = serde_json::Map<String, JsonValue>;

/// Descriptor for one column of a result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldInfo {
    pub name: String,
    pub type_name: String,
    pub nullable: bool,
}

/// Normalized result of a query or routine invocation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResult {
    /// Rows in the order the backend returned them.
    pub rows: Vec<Row>,
    /// `rows.len()`, or the affected-row count for statements that return
    /// no rowset.
    pub row_count: u64,
    /// Column descriptors, when a rowset was returned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldInfo>>,
}

impl QueryResult {
    /// An empty rowset. Never represented as null/absent.
    pub fn empty() -> Self {
        Self {
            rows: Vec::new(),
            row_count: 0,
            fields: None,
        }
    }

    /// Result for a row-affecting statement without a rowset.
    pub fn from_affected(count: u64) -> Self {
        Self {
            rows: Vec::new(),
            row_count: count,
            fields: None,
        }
    }

    /// Deserialize every row into a typed struct.
    pub fn rows_as<T: serde::de::DeserializeOwned>(&self) -> Result<Vec<T>, serde_json::Error> {
        self.rows
            .iter()
            .map(|row| serde_json::from_value(JsonValue::Object(row.clone())))
            .collect()
    }
}

/// Logical category for a column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ColumnKind {
    Integer,
    Float,
    Decimal,
    Boolean,
    Binary,
    Json,
    Temporal,
    Text,
}

/// Classify a backend type name into a decode category.
pub(crate) fn classify(type_name: &str, backend: BackendType) -> ColumnKind {
    let lower = type_name.to_lowercase();

    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC affinity is a float
        if backend == BackendType::Sqlite {
            return ColumnKind::Float;
        }
        return ColumnKind::Decimal;
    }
    if lower.contains("timestamp")
        || lower.contains("datetime")
        || lower == "date"
        || lower == "time"
        || lower == "timetz"
    {
        return ColumnKind::Temporal;
    }
    if lower.contains("int") || lower.contains("serial") {
        return ColumnKind::Integer;
    }
    if lower == "bool" || lower == "boolean" {
        return ColumnKind::Boolean;
    }
    if lower.contains("float") || lower.contains("double") || lower.contains("real") {
        return ColumnKind::Float;
    }
    if lower == "json" || lower == "jsonb" {
        return ColumnKind::Json;
    }
    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return ColumnKind::Binary;
    }
    ColumnKind::Text
}

/// Base64-encode binary column data.
pub(crate) fn encode_binary(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

/// Raw DECIMAL/NUMERIC value kept as the exact string the server sent.
#[derive(Debug)]
pub(crate) struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

fn float_to_json(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

fn fields_of<R: SqlxRow>(row: &R) -> Vec<FieldInfo> {
    row.columns()
        .iter()
        .map(|col| FieldInfo {
            name: col.name().to_string(),
            type_name: col.type_info().name().to_string(),
            nullable: col.type_info().is_null(),
        })
        .collect()
}

/// Adapt MySQL rows into a normalized result.
pub(crate) fn adapt_mysql_rows(rows: &[MySqlRow]) -> QueryResult {
    let fields = rows.first().map(fields_of);
    let json_rows: Vec<Row> = rows.iter().map(mysql::row_to_json).collect();
    QueryResult {
        row_count: json_rows.len() as u64,
        rows: json_rows,
        fields,
    }
}

/// Adapt PostgreSQL rows into a normalized result.
pub(crate) fn adapt_postgres_rows(rows: &[PgRow]) -> QueryResult {
    let fields = rows.first().map(fields_of);
    let json_rows: Vec<Row> = rows.iter().map(postgres::row_to_json).collect();
    QueryResult {
        row_count: json_rows.len() as u64,
        rows: json_rows,
        fields,
    }
}

/// Adapt SQLite rows into a normalized result.
pub(crate) fn adapt_sqlite_rows(rows: &[SqliteRow]) -> QueryResult {
    let fields = rows.first().map(fields_of);
    let json_rows: Vec<Row> = rows.iter().map(sqlite::row_to_json).collect();
    QueryResult {
        row_count: json_rows.len() as u64,
        rows: json_rows,
        fields,
    }
}

mod mysql {
    use super::*;

    pub fn row_to_json(row: &MySqlRow) -> Row {
        row.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let kind = classify(col.type_info().name(), BackendType::MySql);
                (col.name().to_string(), decode_column(row, idx, kind))
            })
            .collect()
    }

    fn decode_column(row: &MySqlRow, idx: usize, kind: ColumnKind) -> JsonValue {
        match kind {
            ColumnKind::Decimal => match row.try_get::<Option<RawDecimal>, _>(idx) {
                Ok(Some(v)) => JsonValue::String(v.0),
                _ => JsonValue::Null,
            },
            ColumnKind::Integer => decode_integer(row, idx),
            ColumnKind::Boolean => row
                .try_get::<Option<bool>, _>(idx)
                .ok()
                .flatten()
                .map(JsonValue::Bool)
                .unwrap_or(JsonValue::Null),
            ColumnKind::Float => decode_float(row, idx),
            ColumnKind::Binary => row
                .try_get::<Option<Vec<u8>>, _>(idx)
                .ok()
                .flatten()
                .map(|v| encode_binary(&v))
                .unwrap_or(JsonValue::Null),
            ColumnKind::Json => row
                .try_get::<Option<serde_json::Value>, _>(idx)
                .ok()
                .flatten()
                .unwrap_or(JsonValue::Null),
            ColumnKind::Temporal => decode_temporal(row, idx),
            ColumnKind::Text => row
                .try_get::<Option<String>, _>(idx)
                .ok()
                .flatten()
                .map(JsonValue::String)
                .unwrap_or(JsonValue::Null),
        }
    }

    // TIMESTAMP carries a zone, DATETIME/DATE/TIME do not.
    fn decode_temporal(row: &MySqlRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx) {
            return JsonValue::String(v.to_rfc3339());
        }
        if let Ok(Some(v)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        if let Ok(Some(v)) = row.try_get::<Option<chrono::NaiveDate>, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        if let Ok(Some(v)) = row.try_get::<Option<chrono::NaiveTime>, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        JsonValue::Null
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> JsonValue {
        if let Ok(None) = row.try_get::<Option<i64>, _>(idx) {
            return JsonValue::Null;
        }
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i8>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        // Unsigned columns
        if let Ok(Some(v)) = row.try_get::<Option<u64>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<u32>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        JsonValue::Null
    }

    fn decode_float(row: &MySqlRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
            return float_to_json(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
            return float_to_json(v as f64);
        }
        JsonValue::Null
    }
}

mod postgres {
    use super::*;

    pub fn row_to_json(row: &PgRow) -> Row {
        row.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let kind = classify(col.type_info().name(), BackendType::Postgres);
                (col.name().to_string(), decode_column(row, idx, kind))
            })
            .collect()
    }

    fn decode_column(row: &PgRow, idx: usize, kind: ColumnKind) -> JsonValue {
        match kind {
            ColumnKind::Decimal => match row.try_get::<Option<RawDecimal>, _>(idx) {
                Ok(Some(v)) => JsonValue::String(v.0),
                _ => JsonValue::Null,
            },
            ColumnKind::Integer => decode_integer(row, idx),
            ColumnKind::Boolean => row
                .try_get::<Option<bool>, _>(idx)
                .ok()
                .flatten()
                .map(JsonValue::Bool)
                .unwrap_or(JsonValue::Null),
            ColumnKind::Float => decode_float(row, idx),
            ColumnKind::Binary => row
                .try_get::<Option<Vec<u8>>, _>(idx)
                .ok()
                .flatten()
                .map(|v| encode_binary(&v))
                .unwrap_or(JsonValue::Null),
            ColumnKind::Json => row
                .try_get::<Option<serde_json::Value>, _>(idx)
                .ok()
                .flatten()
                .unwrap_or(JsonValue::Null),
            ColumnKind::Temporal => decode_temporal(row, idx),
            ColumnKind::Text => row
                .try_get::<Option<String>, _>(idx)
                .ok()
                .flatten()
                .map(JsonValue::String)
                .unwrap_or(JsonValue::Null),
        }
    }

    // timestamptz carries a zone, timestamp/date/time do not.
    fn decode_temporal(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx) {
            return JsonValue::String(v.to_rfc3339());
        }
        if let Ok(Some(v)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        if let Ok(Some(v)) = row.try_get::<Option<chrono::NaiveDate>, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        if let Ok(Some(v)) = row.try_get::<Option<chrono::NaiveTime>, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        JsonValue::Null
    }

    fn decode_integer(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        JsonValue::Null
    }

    fn decode_float(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
            return float_to_json(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
            return float_to_json(v as f64);
        }
        JsonValue::Null
    }
}

mod sqlite {
    use super::*;

    pub fn row_to_json(row: &SqliteRow) -> Row {
        row.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let kind = classify(col.type_info().name(), BackendType::Sqlite);
                (col.name().to_string(), decode_column(row, idx, kind))
            })
            .collect()
    }

    fn decode_column(row: &SqliteRow, idx: usize, kind: ColumnKind) -> JsonValue {
        match kind {
            ColumnKind::Integer => row
                .try_get::<Option<i64>, _>(idx)
                .ok()
                .flatten()
                .map(|v| JsonValue::Number(v.into()))
                .unwrap_or(JsonValue::Null),
            ColumnKind::Boolean => row
                .try_get::<Option<bool>, _>(idx)
                .ok()
                .flatten()
                .map(JsonValue::Bool)
                .unwrap_or(JsonValue::Null),
            ColumnKind::Float | ColumnKind::Decimal => row
                .try_get::<Option<f64>, _>(idx)
                .ok()
                .flatten()
                .map(float_to_json)
                .unwrap_or(JsonValue::Null),
            ColumnKind::Binary => row
                .try_get::<Option<Vec<u8>>, _>(idx)
                .ok()
                .flatten()
                .map(|v| encode_binary(&v))
                .unwrap_or(JsonValue::Null),
            ColumnKind::Temporal => decode_temporal(row, idx),
            ColumnKind::Json | ColumnKind::Text => decode_text(row, idx, kind),
        }
    }

    // Declared DATE/DATETIME columns; the stored value may be text or a
    // unix timestamp.
    fn decode_temporal(row: &SqliteRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        if let Ok(Some(v)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx) {
            return JsonValue::String(v.to_rfc3339());
        }
        if let Ok(Some(v)) = row.try_get::<Option<chrono::NaiveDate>, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        if let Ok(Some(v)) = row.try_get::<Option<String>, _>(idx) {
            return JsonValue::String(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        JsonValue::Null
    }

    fn decode_text(row: &SqliteRow, idx: usize, kind: ColumnKind) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<String>, _>(idx) {
            // JSON columns arrive as text
            if kind == ColumnKind::Json {
                if let Ok(json) = serde_json::from_str::<JsonValue>(&v) {
                    return json;
                }
            }
            return JsonValue::String(v);
        }
        JsonValue::Null
    }
}

//! Row normalization.
//!
//! Driver rows are converted into [`Value`] cells in two phases:
//! 1. `TypeCategory` classifies a column's backend type name
//! 2. Database-specific decoders extract the cell for that category
//!
//! Anything a decoder does not special-case falls back to the cell's textual
//! form. PostgreSQL binary-format cells with no matching decoder come back as
//! their raw bytes. Only SQL `NULL` becomes `Value::Null`.

use crate::models::{DatabaseType, Value};
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueFormat, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo, ValueRef};

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Temporal,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Arrays (PostgreSQL `INT4[]`) are left to the fallback decoder
    if lower.ends_with("[]") {
        return TypeCategory::Unknown;
    }

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC is actually a float
        if db == DatabaseType::SQLite && lower == "numeric" {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    // Temporal - before integers, "interval" contains "int"
    if lower.contains("date") || lower.contains("time") || lower == "interval" {
        return TypeCategory::Temporal;
    }

    if lower.contains("int") || lower.contains("serial") || lower.contains("tiny") {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.contains("char") || lower.contains("text") || lower == "name" {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

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
        PgTypeInfo::with_name("NUMERIC")
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        match value.format() {
            PgValueFormat::Text => Ok(RawDecimal(value.as_str()?.to_string())),
            PgValueFormat::Binary => Ok(RawDecimal(pg_numeric_to_string(value.as_bytes()?)?)),
        }
    }
}

/// Render PostgreSQL's binary NUMERIC encoding as decimal text.
///
/// Layout: `ndigits`, `weight`, `sign`, `dscale` (all 16-bit big endian),
/// then `ndigits` base-10000 digits; digit `i` has weight `10000^(weight - i)`.
fn pg_numeric_to_string(bytes: &[u8]) -> Result<String, sqlx::error::BoxDynError> {
    use std::fmt::Write;

    let read = |offset: usize| -> Result<i16, sqlx::error::BoxDynError> {
        bytes
            .get(offset..offset + 2)
            .map(|b| i16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "truncated NUMERIC value".into())
    };

    let ndigits = usize::try_from(read(0)?)?;
    let weight = i32::from(read(2)?);
    let sign = read(4)? as u16;
    let dscale = usize::from(read(6)? as u16);

    match sign {
        0xC000 => return Ok("NaN".to_string()),
        0xD000 => return Ok("Infinity".to_string()),
        0xF000 => return Ok("-Infinity".to_string()),
        _ => {}
    }

    let digits = (0..ndigits)
        .map(|i| read(8 + 2 * i))
        .collect::<Result<Vec<i16>, _>>()?;
    let digit_at = |pos: i32| -> i16 {
        usize::try_from(pos)
            .ok()
            .and_then(|p| digits.get(p).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == 0x4000 {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        for pos in 0..=weight {
            if pos == 0 {
                write!(out, "{}", digit_at(pos))?;
            } else {
                write!(out, "{:04}", digit_at(pos))?;
            }
        }
    }

    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut pos = weight + 1;
        while fraction.len() < dscale {
            write!(fraction, "{:04}", digit_at(pos))?;
            pos += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }

    Ok(out)
}

// =============================================================================
// Row to Value Trait
// =============================================================================

/// Trait for converting database rows to portable values.
pub trait RowToValues {
    fn column_names(&self) -> Vec<String>;
    fn to_values(&self) -> Vec<Value>;
}

impl RowToValues for MySqlRow {
    fn column_names(&self) -> Vec<String> {
        self.columns().iter().map(|c| c.name().to_string()).collect()
    }

    fn to_values(&self) -> Vec<Value> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), DatabaseType::MySQL);
                mysql::decode_column(self, idx, category)
            })
            .collect()
    }
}

impl RowToValues for PgRow {
    fn column_names(&self) -> Vec<String> {
        self.columns().iter().map(|c| c.name().to_string()).collect()
    }

    fn to_values(&self) -> Vec<Value> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), DatabaseType::PostgreSQL);
                postgres::decode_column(self, idx, category)
            })
            .collect()
    }
}

impl RowToValues for SqliteRow {
    fn column_names(&self) -> Vec<String> {
        self.columns().iter().map(|c| c.name().to_string()).collect()
    }

    fn to_values(&self) -> Vec<Value> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), DatabaseType::SQLite);
                sqlite::decode_column(self, idx, category)
            })
            .collect()
    }
}

/// Last resort for any row: the cell as text, skipping type checks, or its
/// raw bytes when it is not valid UTF-8.
fn decode_unchecked_text<R>(row: &R, idx: usize) -> Value
where
    R: Row,
    for<'r> String: Decode<'r, R::Database>,
    for<'r> Vec<u8>: Decode<'r, R::Database>,
    usize: sqlx::ColumnIndex<R>,
{
    if let Ok(Some(v)) = row.try_get_unchecked::<Option<String>, _>(idx) {
        return Value::String(v);
    }
    match row.try_get_unchecked::<Option<Vec<u8>>, _>(idx) {
        Ok(Some(v)) => Value::Bytes(v),
        _ => Value::Null,
    }
}

fn float_value(v: f64) -> Value {
    Value::Float(v)
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> Value {
        match row.try_get_raw(idx) {
            Ok(raw) if raw.is_null() => return Value::Null,
            Err(_) => return Value::Null,
            Ok(_) => {}
        }
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_binary(row, idx),
            TypeCategory::Json => decode_json(row, idx),
            TypeCategory::Temporal => decode_temporal(row, idx),
            _ => decode_text(row, idx),
        }
    }

    fn decode_decimal(row: &MySqlRow, idx: usize) -> Value {
        // Kept as text; f64 would lose precision.
        match row.try_get::<RawDecimal, _>(idx) {
            Ok(v) => Value::String(v.0),
            Err(e) => {
                tracing::error!("Failed to decode DECIMAL: {:?}", e);
                decode_unchecked_text(row, idx)
            }
        }
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> Value {
        if let Ok(v) = row.try_get::<i64, _>(idx) {
            return Value::Int(v);
        }
        if let Ok(v) = row.try_get::<i32, _>(idx) {
            return Value::Int(v.into());
        }
        if let Ok(v) = row.try_get::<i16, _>(idx) {
            return Value::Int(v.into());
        }
        if let Ok(v) = row.try_get::<i8, _>(idx) {
            return Value::Int(v.into());
        }
        if let Ok(v) = row.try_get::<u64, _>(idx) {
            // BIGINT UNSIGNED beyond i64 keeps its exact digits
            return i64::try_from(v)
                .map(Value::Int)
                .unwrap_or_else(|_| Value::String(v.to_string()));
        }
        if let Ok(v) = row.try_get::<u32, _>(idx) {
            return Value::Int(v.into());
        }
        if let Ok(v) = row.try_get::<u16, _>(idx) {
            return Value::Int(v.into());
        }
        if let Ok(v) = row.try_get::<u8, _>(idx) {
            return Value::Int(v.into());
        }
        decode_unchecked_text(row, idx)
    }

    fn decode_boolean(row: &MySqlRow, idx: usize) -> Value {
        row.try_get::<bool, _>(idx)
            .map(Value::Bool)
            .unwrap_or_else(|_| decode_integer(row, idx))
    }

    fn decode_float(row: &MySqlRow, idx: usize) -> Value {
        if let Ok(v) = row.try_get::<f64, _>(idx) {
            return float_value(v);
        }
        if let Ok(v) = row.try_get::<f32, _>(idx) {
            return float_value(v.into());
        }
        decode_unchecked_text(row, idx)
    }

    fn decode_binary(row: &MySqlRow, idx: usize) -> Value {
        row.try_get::<Vec<u8>, _>(idx)
            .map(Value::Bytes)
            .unwrap_or_else(|_| decode_unchecked_text(row, idx))
    }

    fn decode_json(row: &MySqlRow, idx: usize) -> Value {
        row.try_get::<serde_json::Value, _>(idx)
            .map(Value::Opaque)
            .unwrap_or_else(|_| decode_unchecked_text(row, idx))
    }

    fn decode_temporal(row: &MySqlRow, idx: usize) -> Value {
        if let Ok(v) = row.try_get::<NaiveDateTime, _>(idx) {
            return Value::String(v.to_string());
        }
        if let Ok(v) = row.try_get::<DateTime<Utc>, _>(idx) {
            return Value::String(v.to_rfc3339());
        }
        if let Ok(v) = row.try_get::<NaiveDate, _>(idx) {
            return Value::String(v.to_string());
        }
        if let Ok(v) = row.try_get::<NaiveTime, _>(idx) {
            return Value::String(v.to_string());
        }
        decode_unchecked_text(row, idx)
    }

    fn decode_text(row: &MySqlRow, idx: usize) -> Value {
        row.try_get::<String, _>(idx)
            .map(Value::String)
            .unwrap_or_else(|_| decode_unchecked_text(row, idx))
    }
}

mod postgres {
    use super::*;
    use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
    use serde_json::Value as JsonValue;
    use sqlx::postgres::types::{PgInterval, PgMoney, PgTimeTz};
    use sqlx::types::Uuid;

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> Value {
        match row.try_get_raw(idx) {
            Ok(raw) if raw.is_null() => return Value::Null,
            Err(_) => return Value::Null,
            Ok(_) => {}
        }
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_binary(row, idx),
            TypeCategory::Json => decode_json(row, idx),
            TypeCategory::Uuid => decode_uuid(row, idx),
            TypeCategory::Temporal => decode_temporal(row, idx),
            _ => decode_text(row, idx),
        }
    }

    fn decode_decimal(row: &PgRow, idx: usize) -> Value {
        // Kept as text; f64 would lose precision.
        match row.try_get::<RawDecimal, _>(idx) {
            Ok(v) => Value::String(v.0),
            Err(e) => {
                tracing::error!("Failed to decode NUMERIC: {:?}", e);
                fallback(row, idx)
            }
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> Value {
        if let Ok(v) = row.try_get::<i64, _>(idx) {
            return Value::Int(v);
        }
        if let Ok(v) = row.try_get::<i32, _>(idx) {
            return Value::Int(v.into());
        }
        if let Ok(v) = row.try_get::<i16, _>(idx) {
            return Value::Int(v.into());
        }
        decode_text(row, idx)
    }

    fn decode_boolean(row: &PgRow, idx: usize) -> Value {
        row.try_get::<bool, _>(idx)
            .map(Value::Bool)
            .unwrap_or_else(|_| fallback(row, idx))
    }

    fn decode_float(row: &PgRow, idx: usize) -> Value {
        if let Ok(v) = row.try_get::<f64, _>(idx) {
            return float_value(v);
        }
        if let Ok(v) = row.try_get::<f32, _>(idx) {
            return float_value(v.into());
        }
        fallback(row, idx)
    }

    fn decode_binary(row: &PgRow, idx: usize) -> Value {
        row.try_get::<Vec<u8>, _>(idx)
            .map(Value::Bytes)
            .unwrap_or_else(|_| fallback(row, idx))
    }

    fn decode_json(row: &PgRow, idx: usize) -> Value {
        row.try_get::<serde_json::Value, _>(idx)
            .map(Value::Opaque)
            .unwrap_or_else(|_| fallback(row, idx))
    }

    fn decode_uuid(row: &PgRow, idx: usize) -> Value {
        row.try_get::<Uuid, _>(idx)
            .map(|v| Value::String(v.to_string()))
            .unwrap_or_else(|_| decode_text(row, idx))
    }

    fn decode_temporal(row: &PgRow, idx: usize) -> Value {
        if let Ok(v) = row.try_get::<DateTime<Utc>, _>(idx) {
            return Value::String(v.to_rfc3339());
        }
        if let Ok(v) = row.try_get::<NaiveDateTime, _>(idx) {
            return Value::String(v.to_string());
        }
        if let Ok(v) = row.try_get::<NaiveDate, _>(idx) {
            return Value::String(v.to_string());
        }
        if let Ok(v) = row.try_get::<NaiveTime, _>(idx) {
            return Value::String(v.to_string());
        }
        decode_text(row, idx)
    }

    fn decode_text(row: &PgRow, idx: usize) -> Value {
        row.try_get::<String, _>(idx)
            .map(Value::String)
            .unwrap_or_else(|_| fallback(row, idx))
    }

    /// Cells no typed decoder accepted.
    ///
    /// Text-format cells (simple query protocol) keep their text. Binary-format
    /// cells try the remaining sqlx types, then come back as raw bytes.
    fn fallback(row: &PgRow, idx: usize) -> Value {
        let raw = match row.try_get_raw(idx) {
            Ok(raw) if raw.is_null() => return Value::Null,
            Ok(raw) => raw,
            Err(_) => return Value::Null,
        };
        if raw.format() == PgValueFormat::Text {
            if let Ok(text) = raw.as_str() {
                return Value::String(text.to_string());
            }
        }

        if let Ok(v) = row.try_get::<PgInterval, _>(idx) {
            return Value::String(format_interval(v.months, v.days, v.microseconds));
        }
        if let Ok(v) = row.try_get::<PgTimeTz<NaiveTime, FixedOffset>, _>(idx) {
            return Value::String(format!("{}{}", v.time, v.offset));
        }
        if let Ok(v) = row.try_get::<PgMoney, _>(idx) {
            return Value::String(format_money(v.0));
        }
        if let Some(v) = decode_array(row, idx) {
            return v;
        }

        Value::Bytes(raw.as_bytes().map(<[u8]>::to_vec).unwrap_or_default())
    }

    fn decode_array(row: &PgRow, idx: usize) -> Option<Value> {
        fn items<T: Into<JsonValue>>(cells: Vec<Option<T>>) -> Value {
            Value::Opaque(JsonValue::Array(
                cells
                    .into_iter()
                    .map(|cell| cell.map_or(JsonValue::Null, Into::into))
                    .collect(),
            ))
        }

        if let Ok(v) = row.try_get::<Vec<Option<i64>>, _>(idx) {
            return Some(items(v));
        }
        if let Ok(v) = row.try_get::<Vec<Option<i32>>, _>(idx) {
            return Some(items(v));
        }
        if let Ok(v) = row.try_get::<Vec<Option<i16>>, _>(idx) {
            return Some(items(v));
        }
        if let Ok(v) = row.try_get::<Vec<Option<f64>>, _>(idx) {
            return Some(items(v));
        }
        if let Ok(v) = row.try_get::<Vec<Option<f32>>, _>(idx) {
            return Some(items(v));
        }
        if let Ok(v) = row.try_get::<Vec<Option<bool>>, _>(idx) {
            return Some(items(v));
        }
        if let Ok(v) = row.try_get::<Vec<Option<String>>, _>(idx) {
            return Some(items(v));
        }
        None
    }

    /// PostgreSQL's default interval style, e.g. `1 year 2 mons 3 days 04:05:06.5`.
    pub(super) fn format_interval(months: i32, days: i32, microseconds: i64) -> String {
        let mut parts = Vec::new();
        let (years, months) = (months / 12, months % 12);
        for (n, one, many) in [
            (years, "year", "years"),
            (months, "mon", "mons"),
            (days, "day", "days"),
        ] {
            if n != 0 {
                parts.push(format!("{} {}", n, if n == 1 { one } else { many }));
            }
        }

        if microseconds != 0 || parts.is_empty() {
            let sign = if microseconds < 0 { "-" } else { "" };
            let total = microseconds.unsigned_abs();
            let (secs, fraction) = (total / 1_000_000, total % 1_000_000);
            let mut clock = format!(
                "{}{:02}:{:02}:{:02}",
                sign,
                secs / 3600,
                secs / 60 % 60,
                secs % 60
            );
            if fraction != 0 {
                let digits = format!("{:06}", fraction);
                clock.push('.');
                clock.push_str(digits.trim_end_matches('0'));
            }
            parts.push(clock);
        }

        parts.join(" ")
    }

    /// `MONEY` arrives as cents; rendered with two fraction digits.
    pub(super) fn format_money(cents: i64) -> String {
        let sign = if cents < 0 { "-" } else { "" };
        let abs = cents.unsigned_abs();
        format!("{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

mod sqlite {
    use super::*;

    /// SQLite is dynamically typed: the cell's storage class decides the
    /// decoder, the declared column type only refines it.
    pub fn decode_column(row: &SqliteRow, idx: usize, category: TypeCategory) -> Value {
        let storage = match row.try_get_raw(idx) {
            Ok(raw) if raw.is_null() => return Value::Null,
            Ok(raw) => raw.type_info().name().to_ascii_uppercase(),
            Err(_) => return Value::Null,
        };

        match storage.as_str() {
            "INTEGER" | "BOOLEAN" => decode_integer(row, idx, category),
            "REAL" => row
                .try_get_unchecked::<f64, _>(idx)
                .map(float_value)
                .unwrap_or(Value::Null),
            "BLOB" => row
                .try_get_unchecked::<Vec<u8>, _>(idx)
                .map(Value::Bytes)
                .unwrap_or(Value::Null),
            _ => decode_text(row, idx, category),
        }
    }

    fn decode_integer(row: &SqliteRow, idx: usize, category: TypeCategory) -> Value {
        match row.try_get_unchecked::<i64, _>(idx) {
            Ok(v) if category == TypeCategory::Boolean => Value::Bool(v != 0),
            Ok(v) => Value::Int(v),
            Err(_) => Value::Null,
        }
    }

    fn decode_text(row: &SqliteRow, idx: usize, category: TypeCategory) -> Value {
        let Ok(text) = row.try_get_unchecked::<String, _>(idx) else {
            return Value::Null;
        };
        if category == TypeCategory::Json {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(&text) {
                return Value::Opaque(json);
            }
        }
        Value::String(text)
    }
}

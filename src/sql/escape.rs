//! Identifier and literal escaping.
//!
//! This is purely syntactic escaping, not parameter binding. Generated SQL is
//! only safe because every identifier and every literal passes through here.

use crate::error::{DbError, DbResult};
use crate::models::Value;

/// Escape a column identifier: wrap in double quotes, doubling embedded quotes.
pub fn escape_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Escape a value as a SQL literal.
///
/// Numbers and booleans are emitted unquoted in canonical form; NULL is the
/// bare keyword; everything else is stringified and single-quoted with
/// embedded quotes doubled.
pub fn escape_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(_) | Value::Int(_) => value.to_text(),
        Value::Float(v) if v.is_finite() => value.to_text(),
        other => quote_text(&other.to_text()),
    }
}

fn quote_text(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Check a name that is interpolated without quoting (table names, `RETURNING` lists).
///
/// Accepts one or more dot-separated segments of ASCII letters, digits, `_`
/// or `$`, where a segment does not start with a digit.
pub fn validate_table_name(name: &str) -> DbResult<()> {
    if is_plain_name(name) {
        Ok(())
    } else {
        Err(DbError::invalid_input(format!(
            "Invalid table name '{}': expected letters, digits, '_' or '$', optionally schema-qualified",
            name
        )))
    }
}

/// Check a `RETURNING` clause: `*` or a comma-separated list of plain names.
pub fn validate_returning(returning: &str) -> DbResult<()> {
    let trimmed = returning.trim();
    if trimmed == "*" || (!trimmed.is_empty() && trimmed.split(',').all(|part| is_plain_name(part.trim())))
    {
        Ok(())
    } else {
        Err(DbError::invalid_input(format!(
            "Invalid returning clause '{}': expected '*' or a comma-separated list of column names",
            returning
        )))
    }
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) if first.is_ascii_alphabetic() || first == '_' => chars
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$'),
                _ => false,
            }
        })
}

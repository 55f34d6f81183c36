//! Text generation for the structured `select` and `insert` actions.

use super::escape::{escape_identifier, escape_literal, validate_returning, validate_table_name};
use crate::error::{DbError, DbResult};
use crate::models::{InsertDescriptor, SelectDescriptor};

/// Build `SELECT <cols> FROM <table>`.
///
/// Omitted fields select every column; an explicitly empty list is rejected.
pub fn build_select(select: &SelectDescriptor) -> DbResult<String> {
    validate_table_name(&select.table)?;

    let columns = match &select.fields {
        None => "*".to_string(),
        Some(fields) if fields.is_empty() => {
            return Err(DbError::invalid_input(
                "select 'fields' must not be empty; omit it to select every column",
            ));
        }
        Some(fields) => join_identifiers(fields),
    };

    Ok(format!("SELECT {} FROM {}", columns, select.table))
}

/// Build a multi-row `INSERT INTO <table> (<cols>) VALUES (...),(...)`.
pub fn build_insert(insert: &InsertDescriptor) -> DbResult<String> {
    validate_table_name(&insert.table)?;

    if insert.fields.is_empty() {
        return Err(DbError::invalid_input("insert 'fields' must not be empty"));
    }
    if insert.values.is_empty() {
        return Err(DbError::invalid_input("insert 'values' must not be empty"));
    }

    let mut rows = Vec::with_capacity(insert.values.len());
    for (index, row) in insert.values.iter().enumerate() {
        if row.len() != insert.fields.len() {
            return Err(DbError::invalid_input(format!(
                "insert row {} has {} values but {} fields were named",
                index,
                row.len(),
                insert.fields.len()
            )));
        }
        let literals: Vec<String> = row.iter().map(escape_literal).collect();
        rows.push(format!("({})", literals.join(",")));
    }

    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES {}",
        insert.table,
        join_identifiers(&insert.fields),
        rows.join(",")
    );

    if let Some(returning) = &insert.returning {
        validate_returning(returning)?;
        sql.push_str(" RETURNING ");
        sql.push_str(returning.trim());
    }

    Ok(sql)
}

fn join_identifiers(fields: &[String]) -> String {
    fields
        .iter()
        .map(|f| escape_identifier(f))
        .collect::<Vec<_>>()
        .join(",")
}

//! Single-statement resolution.

use crate::error::{DbError, DbResult};
use crate::models::{Action, Command, PreparedDescriptor, RawDescriptor, Request};
use crate::sql::{build_insert, build_select};

/// Turn a `select`, `insert`, `raw` or `prepared` request into a command.
///
/// Fails with a validation error before any connection is touched.
pub fn resolve_statement(request: &Request) -> DbResult<Command> {
    match request.action {
        Action::Select => Ok(Command::raw(build_select(&request.descriptor()?)?)),
        Action::Insert => Ok(Command::raw(build_insert(&request.descriptor()?)?)),
        Action::Raw => {
            let raw: RawDescriptor = request.descriptor()?;
            if raw.command.trim().is_empty() {
                return Err(DbError::invalid_input("raw 'command' must not be empty"));
            }
            Ok(Command::raw(raw.command))
        }
        Action::Prepared => {
            let prepared: PreparedDescriptor = request.descriptor()?;
            if prepared.statement.trim().is_empty() {
                return Err(DbError::invalid_input(
                    "prepared 'statement' must not be empty",
                ));
            }
            Ok(Command::prepared(prepared.statement, prepared.values))
        }
        other => Err(DbError::invalid_input(format!(
            "Action '{}' is not a single statement",
            other
        ))),
    }
}

//! Atomic multi-statement transactions.
//!
//! All statements of a batch are resolved up front, then run one after the
//! other on a single connection between `BEGIN` and `COMMIT`. The first
//! failure rolls the whole batch back and becomes the reply.
//!
//! The connection goes back to the pool only when it is known to be outside a
//! transaction. If `BEGIN`, `COMMIT` or `ROLLBACK` fails it is discarded.

use crate::db::{Connection, ConnectionLease};
use crate::error::{DbError, DbResult};
use crate::gateway::statement::resolve_statement;
use crate::models::{Command, Outcome, Request, TransactionDescriptor};
use tracing::{debug, warn};

/// Resolve the `statements` of a `transaction` request.
pub fn resolve_batch(request: &Request) -> DbResult<Vec<Command>> {
    let batch: TransactionDescriptor = request.descriptor()?;
    if batch.statements.is_empty() {
        return Err(DbError::invalid_input(
            "transaction 'statements' must not be empty",
        ));
    }

    batch
        .statements
        .iter()
        .enumerate()
        .map(|(index, statement)| {
            if !statement.action.is_statement() {
                return Err(DbError::invalid_input(format!(
                    "Statement {}: action '{}' is not allowed inside a transaction",
                    index, statement.action
                )));
            }
            resolve_statement(statement).map_err(|e| match e {
                DbError::InvalidInput { message } => {
                    DbError::invalid_input(format!("Statement {}: {}", index, message))
                }
                other => other,
            })
        })
        .collect()
}

/// Run `commands` atomically on `lease`, then give the lease back.
pub async fn run_batch<T: Connection>(
    mut lease: ConnectionLease<T>,
    commands: &[Command],
) -> DbResult<Outcome> {
    if let Err(e) = lease.begin().await {
        lease.discard().await;
        return Err(e);
    }

    let mut outcomes = Vec::with_capacity(commands.len());
    for (index, command) in commands.iter().enumerate() {
        match lease.execute(command).await {
            Ok(result) => outcomes.push(Outcome::from(result)),
            Err(e) => {
                debug!(index, error = %e, "Batch statement failed; rolling back");
                match lease.rollback().await {
                    Ok(()) => lease.release().await,
                    Err(rollback_err) => {
                        warn!(error = %rollback_err, "Batch rollback failed; discarding connection");
                        lease.discard().await;
                    }
                }
                return Err(e);
            }
        }
    }

    if let Err(e) = lease.commit().await {
        warn!(error = %e, "Batch commit failed; discarding connection");
        lease.discard().await;
        return Err(e);
    }
    lease.release().await;

    Ok(Outcome {
        message: "COMMIT".to_string(),
        rows_affected: outcomes.iter().map(|o| o.rows_affected).sum(),
        statements: Some(outcomes),
        ..Outcome::default()
    })
}

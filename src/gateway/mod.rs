//! Request handling.
//!
//! - `statement`: resolve a single-statement request into a [`Command`](crate::models::Command)
//! - `batch`: atomic multi-statement transactions in one request
//! - `router`: dispatch every action to the pool, a session or a batch

pub mod batch;
pub mod router;
pub mod statement;

pub use batch::{resolve_batch, run_batch};
pub use router::Router;
pub use statement::resolve_statement;

//! SQL text generation.
//!
//! - `escape`: identifier and literal escaping plus name validation
//! - `builder`: `SELECT` and `INSERT` generation from request descriptors

mod builder;
mod escape;

pub use builder::{build_insert, build_select};
pub use escape::{escape_identifier, escape_literal, validate_returning, validate_table_name};

//! Transports feeding requests into the [`Router`](crate::gateway::Router).
//!
//! The gateway core is transport-agnostic. The binary ships a single
//! transport that reads JSON-lines requests from stdin and writes replies to
//! stdout.

pub mod stdio;

pub use stdio::StdioTransport;

use crate::error::DbResult;
use std::future::Future;

/// A request source driving the router.
pub trait Transport: Send + Sync {
    /// Serve requests until the input ends or a shutdown signal arrives.
    ///
    /// Open sessions are rolled back and the pool is closed before this returns.
    fn run(&self) -> impl Future<Output = DbResult<()>> + Send;

    /// Get the name of this transport for logging.
    fn name(&self) -> &'static str;
}

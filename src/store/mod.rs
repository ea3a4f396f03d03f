//! Persistence: durable message queue and idempotency ledger.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{ClaimedMessage, Database};

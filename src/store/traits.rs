//! Unified `Database` trait — single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::ledger::{LedgerEntry, NewLedgerEntry};

/// A message claimed from the durable queue. Claiming bumps the delivery
/// count and hides the message until the visibility timeout expires.
#[derive(Debug, Clone)]
pub struct ClaimedMessage {
    pub id: String,
    pub subject: Option<String>,
    pub body: Vec<u8>,
    /// 1 on first delivery.
    pub delivery_count: u32,
}

/// Backend-agnostic persistence trait covering the message queue and the
/// idempotency ledger.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Queue ───────────────────────────────────────────────────────

    /// Enqueue a message. Returns the generated message id.
    async fn enqueue_message(
        &self,
        subject: Option<&str>,
        body: &[u8],
    ) -> Result<String, DatabaseError>;

    /// Claim the next visible pending message, if any. The claimed message
    /// becomes invisible for `visibility_timeout_secs`; left unsettled, it
    /// becomes visible again and is redelivered with a higher count.
    async fn claim_next_message(
        &self,
        visibility_timeout_secs: u64,
    ) -> Result<Option<ClaimedMessage>, DatabaseError>;

    /// Acknowledge a message: processing finished, never redeliver.
    async fn complete_message(&self, id: &str) -> Result<(), DatabaseError>;

    /// Move a message to the dead-letter state with an annotation for
    /// downstream alerting.
    async fn dead_letter_message(
        &self,
        id: &str,
        reason: &str,
        description: &str,
    ) -> Result<(), DatabaseError>;

    /// Count of messages in the dead-letter state.
    async fn dead_lettered_count(&self) -> Result<u64, DatabaseError>;

    /// Delete dead-lettered messages older than the cutoff. Returns the
    /// number deleted.
    async fn delete_dead_lettered_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, DatabaseError>;

    // ── Idempotency ledger ──────────────────────────────────────────

    /// Append a completed-operation record. Append-only; never updates.
    async fn insert_ledger_entry(&self, entry: &NewLedgerEntry) -> Result<(), DatabaseError>;

    /// All recorded operations for an exception record, oldest first.
    async fn ledger_entries_for_exception_record(
        &self,
        exception_record_id: &str,
    ) -> Result<Vec<LedgerEntry>, DatabaseError>;
}

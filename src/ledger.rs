//! Idempotency ledger: a durable, append-only audit of completed callback
//! operations. Recording is best-effort — the attach/create decisions are
//! guarded upstream by the store's own state, so a failed write is logged
//! and swallowed rather than rolling back completed work.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::store::Database;

/// Which logical operation completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    AttachToCase,
    CreateCase,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AttachToCase => "attach_to_case",
            Self::CreateCase => "create_case",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A completed operation to be recorded.
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub request_type: RequestType,
    pub exception_record_id: String,
    pub case_id: String,
}

/// A recorded operation, as read back from the ledger.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub id: String,
    pub request_type: String,
    pub exception_record_id: String,
    pub case_id: String,
    pub created_at: DateTime<Utc>,
}

/// Ledger writer with a small bounded retry.
pub struct LedgerProxy {
    db: Arc<dyn Database>,
    retry_count: u32,
}

impl LedgerProxy {
    pub fn new(db: Arc<dyn Database>, retry_count: u32) -> Self {
        Self {
            db,
            retry_count: retry_count.max(1),
        }
    }

    /// Record a completed operation. Never fails the caller.
    pub async fn store(&self, entry: NewLedgerEntry) {
        for attempt in 0..self.retry_count {
            match self.db.insert_ledger_entry(&entry).await {
                Ok(()) => {
                    info!(
                        request_type = %entry.request_type,
                        exception_record = %entry.exception_record_id,
                        case = %entry.case_id,
                        attempt,
                        "Stored ledger entry"
                    );
                    return;
                }
                Err(e) => {
                    error!(
                        request_type = %entry.request_type,
                        exception_record = %entry.exception_record_id,
                        case = %entry.case_id,
                        attempt,
                        error = %e,
                        "Failed to store ledger entry"
                    );
                }
            }
        }
        error!(
            request_type = %entry.request_type,
            exception_record = %entry.exception_record_id,
            case = %entry.case_id,
            retries = self.retry_count,
            "Giving up storing ledger entry"
        );
    }
}

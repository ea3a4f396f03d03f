//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. A single connection is
//! reused for all operations; `libsql::Connection` is `Send + Sync` and
//! safe for concurrent async use.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::ledger::{LedgerEntry, NewLedgerEntry};
use crate::store::migrations;
use crate::store::traits::{ClaimedMessage, Database};

/// libSQL database backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to open database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 datetime string written by this backend.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn query_err(e: libsql::Error) -> DatabaseError {
    DatabaseError::Query(e.to_string())
}

fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Queue ───────────────────────────────────────────────────────

    async fn enqueue_message(
        &self,
        subject: Option<&str>,
        body: &[u8],
    ) -> Result<String, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        self.conn()
            .execute(
                "INSERT INTO queue_messages (id, subject, body, status, delivery_count, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'pending', 0, ?4, ?4)",
                params![
                    id.clone(),
                    opt_text(subject),
                    libsql::Value::Blob(body.to_vec()),
                    now
                ],
            )
            .await
            .map_err(query_err)?;

        Ok(id)
    }

    async fn claim_next_message(
        &self,
        visibility_timeout_secs: u64,
    ) -> Result<Option<ClaimedMessage>, DatabaseError> {
        let now = Utc::now();

        let mut rows = self
            .conn()
            .query(
                "SELECT id, subject, body, delivery_count FROM queue_messages
                 WHERE status = 'pending'
                   AND (locked_until IS NULL OR locked_until <= ?1)
                 ORDER BY created_at
                 LIMIT 1",
                params![now.to_rfc3339()],
            )
            .await
            .map_err(query_err)?;

        let Some(row) = rows.next().await.map_err(query_err)? else {
            return Ok(None);
        };

        let id: String = row.get(0).map_err(query_err)?;
        let subject: Option<String> = row.get(1).ok();
        let body: Vec<u8> = row.get(2).map_err(query_err)?;
        let delivery_count: i64 = row.get(3).map_err(query_err)?;

        let locked_until =
            (now + Duration::seconds(visibility_timeout_secs as i64)).to_rfc3339();
        self.conn()
            .execute(
                "UPDATE queue_messages
                 SET delivery_count = delivery_count + 1,
                     locked_until = ?1,
                     updated_at = ?2
                 WHERE id = ?3",
                params![locked_until, now.to_rfc3339(), id.clone()],
            )
            .await
            .map_err(query_err)?;

        Ok(Some(ClaimedMessage {
            id,
            subject,
            body,
            delivery_count: delivery_count as u32 + 1,
        }))
    }

    async fn complete_message(&self, id: &str) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let affected = self
            .conn()
            .execute(
                "UPDATE queue_messages
                 SET status = 'completed', completed_at = ?1, updated_at = ?1
                 WHERE id = ?2 AND status = 'pending'",
                params![now, id],
            )
            .await
            .map_err(query_err)?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "queue message".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn dead_letter_message(
        &self,
        id: &str,
        reason: &str,
        description: &str,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let affected = self
            .conn()
            .execute(
                "UPDATE queue_messages
                 SET status = 'dead_lettered',
                     dead_letter_reason = ?1,
                     dead_letter_description = ?2,
                     dead_lettered_at = ?3,
                     updated_at = ?3
                 WHERE id = ?4 AND status = 'pending'",
                params![reason, description, now, id],
            )
            .await
            .map_err(query_err)?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "queue message".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn dead_lettered_count(&self) -> Result<u64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM queue_messages WHERE status = 'dead_lettered'",
                (),
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(query_err)? as u64),
            None => Ok(0),
        }
    }

    async fn delete_dead_lettered_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "DELETE FROM queue_messages
                 WHERE status = 'dead_lettered' AND dead_lettered_at < ?1",
                params![cutoff.to_rfc3339()],
            )
            .await
            .map_err(query_err)?;

        Ok(affected as usize)
    }

    // ── Idempotency ledger ──────────────────────────────────────────

    async fn insert_ledger_entry(&self, entry: &NewLedgerEntry) -> Result<(), DatabaseError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        self.conn()
            .execute(
                "INSERT INTO ledger_entries (id, request_type, exception_record_id, case_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id,
                    entry.request_type.as_str(),
                    entry.exception_record_id.clone(),
                    entry.case_id.clone(),
                    now
                ],
            )
            .await
            .map_err(query_err)?;

        Ok(())
    }

    async fn ledger_entries_for_exception_record(
        &self,
        exception_record_id: &str,
    ) -> Result<Vec<LedgerEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, request_type, exception_record_id, case_id, created_at
                 FROM ledger_entries
                 WHERE exception_record_id = ?1
                 ORDER BY created_at",
                params![exception_record_id],
            )
            .await
            .map_err(query_err)?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            entries.push(LedgerEntry {
                id: row.get(0).map_err(query_err)?,
                request_type: row.get(1).map_err(query_err)?,
                exception_record_id: row.get(2).map_err(query_err)?,
                case_id: row.get(3).map_err(query_err)?,
                created_at: parse_datetime(&row.get::<String>(4).map_err(query_err)?),
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_and_claim_round_trip() {
        let db = LibSqlBackend::new_memory().await.unwrap();

        let id = db.enqueue_message(None, b"payload").await.unwrap();
        let claimed = db.claim_next_message(60).await.unwrap().unwrap();

        assert_eq!(claimed.id, id);
        assert_eq!(claimed.body, b"payload");
        assert_eq!(claimed.delivery_count, 1);
    }

    #[tokio::test]
    async fn claimed_message_is_invisible_until_timeout() {
        let db = LibSqlBackend::new_memory().await.unwrap();

        db.enqueue_message(None, b"payload").await.unwrap();
        assert!(db.claim_next_message(60).await.unwrap().is_some());
        // Still locked — nothing to claim.
        assert!(db.claim_next_message(60).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_lock_redelivers_with_higher_count() {
        let db = LibSqlBackend::new_memory().await.unwrap();

        db.enqueue_message(None, b"payload").await.unwrap();
        // Zero-second visibility: the lock expires immediately.
        let first = db.claim_next_message(0).await.unwrap().unwrap();
        let second = db.claim_next_message(0).await.unwrap().unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.delivery_count, 1);
        assert_eq!(second.delivery_count, 2);
    }

    #[tokio::test]
    async fn completed_message_is_never_redelivered() {
        let db = LibSqlBackend::new_memory().await.unwrap();

        db.enqueue_message(None, b"payload").await.unwrap();
        let claimed = db.claim_next_message(0).await.unwrap().unwrap();
        db.complete_message(&claimed.id).await.unwrap();

        assert!(db.claim_next_message(0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dead_lettered_message_keeps_annotation() {
        let db = LibSqlBackend::new_memory().await.unwrap();

        db.enqueue_message(Some("business"), b"bad").await.unwrap();
        let claimed = db.claim_next_message(0).await.unwrap().unwrap();
        db.dead_letter_message(&claimed.id, "Message processing error", "boom")
            .await
            .unwrap();

        assert!(db.claim_next_message(0).await.unwrap().is_none());
        assert_eq!(db.dead_lettered_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn settling_twice_reports_not_found() {
        let db = LibSqlBackend::new_memory().await.unwrap();

        db.enqueue_message(None, b"payload").await.unwrap();
        let claimed = db.claim_next_message(0).await.unwrap().unwrap();
        db.complete_message(&claimed.id).await.unwrap();

        assert!(matches!(
            db.complete_message(&claimed.id).await,
            Err(DatabaseError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn dlq_cleanup_removes_only_old_messages() {
        let db = LibSqlBackend::new_memory().await.unwrap();

        db.enqueue_message(None, b"old").await.unwrap();
        let claimed = db.claim_next_message(0).await.unwrap().unwrap();
        db.dead_letter_message(&claimed.id, "r", "d").await.unwrap();

        // Cutoff in the past deletes nothing.
        let deleted = db
            .delete_dead_lettered_before(Utc::now() - Duration::days(1))
            .await
            .unwrap();
        assert_eq!(deleted, 0);

        // Cutoff in the future deletes the dead-lettered message.
        let deleted = db
            .delete_dead_lettered_before(Utc::now() + Duration::days(1))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(db.dead_lettered_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn messages_are_claimed_oldest_first() {
        let db = LibSqlBackend::new_memory().await.unwrap();

        let first = db.enqueue_message(None, b"one").await.unwrap();
        let _second = db.enqueue_message(None, b"two").await.unwrap();

        let claimed = db.claim_next_message(60).await.unwrap().unwrap();
        assert_eq!(claimed.id, first);
    }
}

//! Periodic dead-letter cleanup.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::store::Database;

/// Spawn a background task deleting dead-lettered messages older than
/// `retention_days`. Returns a `JoinHandle` and shutdown flag.
pub fn spawn_dlq_cleanup(
    db: Arc<dyn Database>,
    retention_days: u32,
    interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(
            retention_days,
            interval_secs = interval.as_secs(),
            "Dead-letter cleanup task started"
        );

        let mut tick = tokio::time::interval(interval);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Dead-letter cleanup shutting down");
                return;
            }

            let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
            match db.delete_dead_lettered_before(cutoff).await {
                Ok(0) => {}
                Ok(deleted) => info!(deleted, "Deleted old dead-lettered messages"),
                Err(e) => error!(error = %e, "Dead-letter cleanup failed"),
            }
        }
    });

    (handle, shutdown_flag)
}

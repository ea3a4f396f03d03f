//! Durable poll-based message source backed by the local database.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::QueueError;
use crate::queue::message::{MessageSource, ReceivedMessage};
use crate::store::{ClaimedMessage, Database};

pub struct DurableQueueSource {
    db: Arc<dyn Database>,
    visibility_timeout_secs: u64,
}

impl DurableQueueSource {
    pub fn new(db: Arc<dyn Database>, visibility_timeout_secs: u64) -> Self {
        Self {
            db,
            visibility_timeout_secs,
        }
    }
}

#[async_trait]
impl MessageSource for DurableQueueSource {
    async fn receive(&self) -> Result<Option<Box<dyn ReceivedMessage>>, QueueError> {
        let claimed = self
            .db
            .claim_next_message(self.visibility_timeout_secs)
            .await
            .map_err(|e| QueueError::Receive(e.to_string()))?;

        Ok(claimed.map(|claimed| {
            Box::new(DurableMessage {
                db: Arc::clone(&self.db),
                claimed,
            }) as Box<dyn ReceivedMessage>
        }))
    }
}

struct DurableMessage {
    db: Arc<dyn Database>,
    claimed: ClaimedMessage,
}

#[async_trait]
impl ReceivedMessage for DurableMessage {
    fn message_id(&self) -> &str {
        &self.claimed.id
    }

    fn delivery_count(&self) -> u32 {
        self.claimed.delivery_count
    }

    fn subject(&self) -> Option<&str> {
        self.claimed.subject.as_deref()
    }

    fn body(&self) -> &[u8] {
        &self.claimed.body
    }

    async fn complete(&self) -> Result<(), QueueError> {
        self.db
            .complete_message(&self.claimed.id)
            .await
            .map_err(|e| QueueError::Settle {
                message_id: self.claimed.id.clone(),
                reason: e.to_string(),
            })
    }

    async fn dead_letter(&self, reason: &str, description: &str) -> Result<(), QueueError> {
        self.db
            .dead_letter_message(&self.claimed.id, reason, description)
            .await
            .map_err(|e| QueueError::Settle {
                message_id: self.claimed.id.clone(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;

    #[tokio::test]
    async fn source_delivers_enqueued_messages() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        db.enqueue_message(Some("business"), b"payload").await.unwrap();

        let source = DurableQueueSource::new(Arc::clone(&db), 60);
        let message = source.receive().await.unwrap().expect("a message");

        assert_eq!(message.subject(), Some("business"));
        assert_eq!(message.body(), b"payload");
        assert_eq!(message.delivery_count(), 1);

        message.complete().await.unwrap();
        assert!(source.receive().await.unwrap().is_none());
    }
}

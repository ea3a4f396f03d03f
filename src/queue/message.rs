//! Minimal capability interface over the broker's message objects.
//!
//! Two implementations exist: the durable poll-based source backed by the
//! local database, and the push-based in-memory queue used in tests and
//! embedded runs. The consumer only ever sees these traits.

use async_trait::async_trait;

use crate::error::QueueError;

/// A delivered message. Leaving it unsettled lets the broker's visibility
/// timeout expire and redeliver it — redelivery is broker-driven, there is
/// no explicit retry loop.
#[async_trait]
pub trait ReceivedMessage: Send + Sync {
    fn message_id(&self) -> &str;

    /// 1 on the first delivery.
    fn delivery_count(&self) -> u32;

    /// Control-message discriminator (e.g. heartbeats).
    fn subject(&self) -> Option<&str>;

    fn body(&self) -> &[u8];

    /// Acknowledge: processing finished, never redeliver.
    async fn complete(&self) -> Result<(), QueueError>;

    /// Terminal: park the message with an annotation for alerting.
    async fn dead_letter(&self, reason: &str, description: &str) -> Result<(), QueueError>;
}

/// Source of inbound messages.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Next available message, or `None` when the queue is empty.
    async fn receive(&self) -> Result<Option<Box<dyn ReceivedMessage>>, QueueError>;
}

/// Processing outcome consumed by the consumer's settle step.
#[derive(Debug)]
pub enum MessageOutcome {
    Success,
    /// Redelivery cannot help; dead-letter with the annotation.
    UnrecoverableFailure { reason: String, description: String },
    /// Leave unsettled (below the delivery cap) or dead-letter (at it).
    PotentiallyRecoverableFailure,
}

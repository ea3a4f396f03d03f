//! Queue consumer: a single sequential polling loop driving each message
//! through parse → route → settle.
//!
//! Message lifecycle: Received → {Acknowledged | Redelivered | DeadLettered}.
//! Redelivery is broker-driven — a potentially-recoverable failure simply
//! leaves the message unacknowledged until its lock expires.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::clients::processed_envelopes::ProcessedEnvelopeNotifier;
use crate::envelope;
use crate::error::{Error, QueueError};
use crate::queue::message::{MessageOutcome, MessageSource, ReceivedMessage};
use crate::router::EnvelopeHandler;

/// Subject marking broker keepalive messages; acknowledged without
/// business processing.
pub const HEARTBEAT_SUBJECT: &str = "heartbeat";

const DEAD_LETTER_PROCESSING_ERROR: &str = "Message processing error";
const DEAD_LETTER_TOO_MANY_DELIVERIES: &str = "Too many deliveries";

pub struct QueueConsumer {
    source: Arc<dyn MessageSource>,
    handler: Arc<dyn EnvelopeHandler>,
    notifier: Arc<dyn ProcessedEnvelopeNotifier>,
    max_delivery_count: u32,
}

impl QueueConsumer {
    pub fn new(
        source: Arc<dyn MessageSource>,
        handler: Arc<dyn EnvelopeHandler>,
        notifier: Arc<dyn ProcessedEnvelopeNotifier>,
        max_delivery_count: u32,
    ) -> Self {
        Self {
            source,
            handler,
            notifier,
            max_delivery_count,
        }
    }

    /// Receive and process one message. Returns false when the queue was
    /// empty.
    pub async fn process_next(&self) -> Result<bool, QueueError> {
        let Some(message) = self.source.receive().await? else {
            return Ok(false);
        };

        info!(message_id = %message.message_id(), "Started processing message");
        let outcome = self.process(message.as_ref()).await;
        self.try_settle(message.as_ref(), outcome).await;
        Ok(true)
    }

    async fn process(&self, message: &dyn ReceivedMessage) -> MessageOutcome {
        if message.subject() == Some(HEARTBEAT_SUBJECT) {
            info!(message_id = %message.message_id(), "Heartbeat message received");
            return MessageOutcome::Success;
        }

        let envelope = match envelope::parse(message.body()) {
            Ok(envelope) => envelope,
            Err(e) => {
                // A malformed payload cannot be fixed by redelivery.
                error!(
                    message_id = %message.message_id(),
                    error = %e,
                    "Rejected invalid message"
                );
                return MessageOutcome::UnrecoverableFailure {
                    reason: DEAD_LETTER_PROCESSING_ERROR.to_string(),
                    description: e.to_string(),
                };
            }
        };

        info!(
            message_id = %message.message_id(),
            envelope = %envelope.id,
            zip_file = %envelope.zip_file_name,
            container = %envelope.container,
            jurisdiction = %envelope.jurisdiction,
            classification = %envelope.classification,
            "Parsed message"
        );

        match self
            .handler
            .handle(&envelope, message.delivery_count())
            .await
        {
            Ok(result) => {
                if let Err(e) = self.notifier.notify(&envelope.id, result).await {
                    error!(
                        message_id = %message.message_id(),
                        envelope = %envelope.id,
                        error = %e,
                        "Failed to notify upstream of processed envelope"
                    );
                    return MessageOutcome::PotentiallyRecoverableFailure;
                }
                info!(
                    message_id = %message.message_id(),
                    envelope = %envelope.id,
                    zip_file = %envelope.zip_file_name,
                    "Processed message"
                );
                MessageOutcome::Success
            }
            Err(Error::Parse(e)) => MessageOutcome::UnrecoverableFailure {
                reason: DEAD_LETTER_PROCESSING_ERROR.to_string(),
                description: e.to_string(),
            },
            Err(e) => {
                error!(
                    message_id = %message.message_id(),
                    envelope = %envelope.id,
                    zip_file = %envelope.zip_file_name,
                    error = %e,
                    "Failed to process message"
                );
                MessageOutcome::PotentiallyRecoverableFailure
            }
        }
    }

    /// Settle the message. Failures here are logged and swallowed — a
    /// settle error must never take down the consumer loop.
    async fn try_settle(&self, message: &dyn ReceivedMessage, outcome: MessageOutcome) {
        if let Err(e) = self.settle(message, &outcome).await {
            error!(
                message_id = %message.message_id(),
                outcome = ?outcome,
                error = %e,
                "Failed to finalise processed message"
            );
        }
    }

    async fn settle(
        &self,
        message: &dyn ReceivedMessage,
        outcome: &MessageOutcome,
    ) -> Result<(), QueueError> {
        match outcome {
            MessageOutcome::Success => {
                message.complete().await?;
                info!(message_id = %message.message_id(), "Message has been completed");
            }
            MessageOutcome::UnrecoverableFailure {
                reason,
                description,
            } => {
                message.dead_letter(reason, description).await?;
                info!(message_id = %message.message_id(), "Message has been dead-lettered");
            }
            MessageOutcome::PotentiallyRecoverableFailure => {
                let delivery_count = message.delivery_count();
                if delivery_count < self.max_delivery_count {
                    // Leave unacknowledged; the broker redelivers once the
                    // lock expires.
                    info!(
                        message_id = %message.message_id(),
                        delivery_count,
                        "Allowing message to return to queue"
                    );
                } else {
                    message
                        .dead_letter(
                            DEAD_LETTER_TOO_MANY_DELIVERIES,
                            &format!(
                                "Reached limit of message delivery count of {delivery_count}"
                            ),
                        )
                        .await?;
                    info!(message_id = %message.message_id(), "Message has been dead-lettered");
                }
            }
        }
        Ok(())
    }
}

/// Spawn the polling loop. Returns a `JoinHandle` and a shutdown flag; set
/// the flag to stop after the current message.
pub fn spawn_consumer(
    consumer: Arc<QueueConsumer>,
    poll_interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(
            interval_secs = poll_interval.as_secs(),
            "Queue consumer started"
        );

        let mut tick = tokio::time::interval(poll_interval);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Queue consumer shutting down");
                return;
            }

            // Drain everything currently visible before sleeping again.
            loop {
                match consumer.process_next().await {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(e) => {
                        error!(error = %e, "Failed to receive from queue");
                        break;
                    }
                }
            }
        }
    });

    (handle, shutdown_flag)
}

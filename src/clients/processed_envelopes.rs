//! Processed-envelope notifications back to the upstream processor.

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::error::QueueError;

/// What the pipeline did with an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvelopeCcdAction {
    AutoAttachedToCase,
    AutoCreatedCase,
    AutoUpdatedCase,
    ExceptionRecord,
}

/// Result of routing one envelope through the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeProcessingResult {
    pub ccd_id: i64,
    pub action: EnvelopeCcdAction,
}

#[derive(Debug, Serialize)]
struct ProcessedEnvelopeNotification<'a> {
    envelope_id: &'a str,
    ccd_id: String,
    envelope_ccd_action: EnvelopeCcdAction,
}

/// Tells the upstream processor an envelope has been handled, so it can
/// mark the envelope complete on its side.
#[async_trait]
pub trait ProcessedEnvelopeNotifier: Send + Sync {
    async fn notify(
        &self,
        envelope_id: &str,
        result: EnvelopeProcessingResult,
    ) -> Result<(), QueueError>;
}

/// HTTP notifier.
pub struct HttpProcessedEnvelopeNotifier {
    http: reqwest::Client,
    url: String,
}

impl HttpProcessedEnvelopeNotifier {
    pub fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }
}

#[async_trait]
impl ProcessedEnvelopeNotifier for HttpProcessedEnvelopeNotifier {
    async fn notify(
        &self,
        envelope_id: &str,
        result: EnvelopeProcessingResult,
    ) -> Result<(), QueueError> {
        let notification = ProcessedEnvelopeNotification {
            envelope_id,
            ccd_id: result.ccd_id.to_string(),
            envelope_ccd_action: result.action,
        };

        self.http
            .post(&self.url)
            .json(&notification)
            .send()
            .await
            .map_err(|e| QueueError::Receive(format!("processed-envelope notify failed: {e}")))?
            .error_for_status()
            .map_err(|e| QueueError::Receive(format!("processed-envelope notify failed: {e}")))?;

        info!(
            envelope = %envelope_id,
            case = result.ccd_id,
            action = ?result.action,
            "Notified upstream of processed envelope"
        );
        Ok(())
    }
}

/// No-op notifier for deployments where the upstream does not consume
/// processed-envelope notifications.
pub struct NoopProcessedEnvelopeNotifier;

#[async_trait]
impl ProcessedEnvelopeNotifier for NoopProcessedEnvelopeNotifier {
    async fn notify(
        &self,
        envelope_id: &str,
        result: EnvelopeProcessingResult,
    ) -> Result<(), QueueError> {
        info!(
            envelope = %envelope_id,
            case = result.ccd_id,
            action = ?result.action,
            "Envelope processed (notifications disabled)"
        );
        Ok(())
    }
}

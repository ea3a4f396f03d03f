//! Payments collaborator: fire-and-forget commands with a distinguishable
//! publishing-failure error, so "attached but payment update pending" is
//! never reported as a full failure.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::casestore::fields;
use crate::cases::validation::CallbackCaseDetails;
use crate::envelope::model::Envelope;
use crate::error::PaymentsError;

/// Commands understood by the payments processor.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "label", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentCommand {
    /// New payment DCNs arrived with an envelope.
    Create {
        envelope_id: String,
        ccd_reference: String,
        jurisdiction: String,
        service: String,
        po_box: String,
        is_exception_record: bool,
        payments: Vec<PaymentInfo>,
    },
    /// An exception record's payments now belong to a (different) case.
    Update {
        envelope_id: String,
        jurisdiction: String,
        exception_record_ref: String,
        new_case_ref: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentInfo {
    pub document_control_number: String,
}

/// Publishes payment commands to the payments processor.
#[async_trait]
pub trait PaymentsPublisher: Send + Sync {
    async fn send(&self, command: PaymentCommand) -> Result<(), PaymentsError>;
}

/// HTTP publisher posting commands to the payments processor.
pub struct HttpPaymentsPublisher {
    http: reqwest::Client,
    base_url: String,
}

impl HttpPaymentsPublisher {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl PaymentsPublisher for HttpPaymentsPublisher {
    async fn send(&self, command: PaymentCommand) -> Result<(), PaymentsError> {
        self.http
            .post(format!("{}/payment-commands", self.base_url))
            .json(&command)
            .send()
            .await
            .map_err(|e| PaymentsError::PublishingFailed(e.to_string()))?
            .error_for_status()
            .map_err(|e| PaymentsError::PublishingFailed(e.to_string()))?;
        Ok(())
    }
}

/// No-op publisher for deployments without a payments processor.
pub struct NoopPaymentsPublisher;

#[async_trait]
impl PaymentsPublisher for NoopPaymentsPublisher {
    async fn send(&self, _command: PaymentCommand) -> Result<(), PaymentsError> {
        Ok(())
    }
}

/// Builds and publishes payment commands for the pipeline.
pub struct PaymentsService {
    publisher: Arc<dyn PaymentsPublisher>,
}

impl PaymentsService {
    pub fn new(publisher: Arc<dyn PaymentsPublisher>) -> Self {
        Self { publisher }
    }

    /// Notify the payments processor of an envelope's payment DCNs. A no-op
    /// for envelopes without payments.
    pub async fn create_new_payment(
        &self,
        envelope: &Envelope,
        ccd_reference: i64,
        is_exception_record: bool,
    ) -> Result<(), PaymentsError> {
        if !envelope.has_payments() {
            return Ok(());
        }

        info!(
            envelope = %envelope.id,
            case = ccd_reference,
            is_exception_record,
            dcns = envelope.payments.len(),
            "Publishing create-payment command"
        );

        self.publisher
            .send(PaymentCommand::Create {
                envelope_id: envelope.id.clone(),
                ccd_reference: ccd_reference.to_string(),
                jurisdiction: envelope.jurisdiction.clone(),
                service: envelope.container.clone(),
                po_box: envelope.po_box.clone(),
                is_exception_record,
                payments: envelope
                    .payments
                    .iter()
                    .map(|p| PaymentInfo {
                        document_control_number: p.document_control_number.clone(),
                    })
                    .collect(),
            })
            .await
    }

    /// Re-point an exception record's payments at the case it was attached
    /// to. A no-op when the exception record declares no payments.
    pub async fn update_payments(
        &self,
        exception_record: &CallbackCaseDetails,
        exception_record_ref: &str,
        jurisdiction: &str,
        new_case_ref: &str,
    ) -> Result<(), PaymentsError> {
        let contains_payments =
            exception_record.data_str(fields::CONTAINS_PAYMENTS) == Some(fields::YES);
        if !contains_payments {
            return Ok(());
        }

        info!(
            exception_record = %exception_record_ref,
            case = %new_case_ref,
            "Publishing update-payment command"
        );

        self.publisher
            .send(PaymentCommand::Update {
                envelope_id: exception_record
                    .data_str(fields::ENVELOPE_ID)
                    .unwrap_or_default()
                    .to_string(),
                jurisdiction: jurisdiction.to_string(),
                exception_record_ref: exception_record_ref.to_string(),
                new_case_ref: new_case_ref.to_string(),
            })
            .await
    }
}

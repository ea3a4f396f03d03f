//! Attach decision engine: attach an exception record's documents to a
//! target case, at most once.
//!
//! Queue delivery is at-least-once, so the engine re-reads the exception
//! record's attached-marker immediately before mutating anything (optimistic
//! concurrency — no client-side locks). The worst case of the remaining
//! race window is a duplicate-document error surfaced to a retry, never a
//! corrupted case.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::casestore::types::{CaseDataContent, CaseEvent};
use crate::casestore::{CaseStore, fields};
use crate::cases::ErrorsAndWarnings;
use crate::cases::documents;
use crate::cases::summary::attach_event_summary;
use crate::cases::update::CaseUpdater;
use crate::cases::validation::{AttachToCaseEventData, CallbackCaseDetails, TargetCaseRefType};
use crate::clients::payments::PaymentsService;
use crate::config::ServiceConfigResolver;
use crate::envelope::model::Classification;
use crate::error::{AttachError, CaseStoreError, Error, Result};
use crate::ledger::{LedgerProxy, NewLedgerEntry, RequestType};

/// Outcome of an attach attempt. Business rejections carry the structured
/// errors/warnings for the requester; unexpected failures propagate as
/// `Err` and are never folded into this type.
#[derive(Debug)]
pub enum AttachResult {
    Attached { case_ref: String },
    Rejected(ErrorsAndWarnings),
}

enum AttachStep {
    Done(String),
    Warnings(ErrorsAndWarnings),
}

pub struct ExceptionRecordAttacher {
    store: Arc<dyn CaseStore>,
    resolver: ServiceConfigResolver,
    updater: Arc<CaseUpdater>,
    payments: Arc<PaymentsService>,
    ledger: Arc<LedgerProxy>,
}

impl ExceptionRecordAttacher {
    pub fn new(
        store: Arc<dyn CaseStore>,
        resolver: ServiceConfigResolver,
        updater: Arc<CaseUpdater>,
        payments: Arc<PaymentsService>,
        ledger: Arc<LedgerProxy>,
    ) -> Self {
        Self {
            store,
            resolver,
            updater,
            payments,
            ledger,
        }
    }

    /// Attach the exception record to its target case.
    pub async fn try_attach_to_case(
        &self,
        event: &AttachToCaseEventData,
        exception_record_details: &CallbackCaseDetails,
        ignore_warnings: bool,
    ) -> Result<AttachResult> {
        let outcome = self.attach(event, ignore_warnings).await;

        let target_case_ref = match outcome {
            Ok(AttachStep::Done(case_ref)) => case_ref,
            Ok(AttachStep::Warnings(errors_and_warnings)) => {
                return Ok(AttachResult::Rejected(errors_and_warnings));
            }
            Err(e) => return self.map_attach_error(event, e),
        };

        self.ledger
            .store(NewLedgerEntry {
                request_type: RequestType::AttachToCase,
                exception_record_id: event.exception_record_id.to_string(),
                case_id: target_case_ref.clone(),
            })
            .await;

        if let Err(e) = self
            .payments
            .update_payments(
                exception_record_details,
                &event.exception_record_id.to_string(),
                &event.exception_record_jurisdiction,
                &target_case_ref,
            )
            .await
        {
            error!(
                exception_record = event.exception_record_id,
                case = %target_case_ref,
                error = %e,
                "Failed to send update to payments processor"
            );
            return Ok(AttachResult::Rejected(ErrorsAndWarnings::with_errors(
                vec![AttachError::PaymentsPublishingFailure.to_string()],
            )));
        }

        info!(
            exception_record = event.exception_record_id,
            case = %target_case_ref,
            "Completed the process of attaching exception record to a case"
        );
        Ok(AttachResult::Attached {
            case_ref: target_case_ref,
        })
    }

    fn map_attach_error(
        &self,
        event: &AttachToCaseEventData,
        e: AttachError,
    ) -> Result<AttachResult> {
        match e {
            AttachError::AlreadyAttachedToCase { .. }
            | AttachError::DuplicateDocuments { .. }
            | AttachError::CaseNotFound(_)
            | AttachError::MultipleCasesFound { .. }
            | AttachError::InvalidCaseId(_) => {
                warn!(
                    exception_record = event.exception_record_id,
                    jurisdiction = %event.exception_record_jurisdiction,
                    target = %event.target_case_ref,
                    error = %e,
                    "Validation error when attaching exception record"
                );
                Ok(AttachResult::Rejected(ErrorsAndWarnings::with_errors(
                    vec![e.to_string()],
                )))
            }
            AttachError::PaymentsPublishingFailure => Ok(AttachResult::Rejected(
                ErrorsAndWarnings::with_errors(vec![e.to_string()]),
            )),
            // Transport and store failures are not the caller's problem —
            // log with context and propagate unmodified.
            AttachError::CaseStore(inner) => {
                error!(
                    exception_record = event.exception_record_id,
                    jurisdiction = %event.exception_record_jurisdiction,
                    target = %event.target_case_ref,
                    error = %inner,
                    "Error attaching exception record to case"
                );
                Err(Error::CaseStore(inner))
            }
        }
    }

    async fn attach(
        &self,
        event: &AttachToCaseEventData,
        ignore_warnings: bool,
    ) -> std::result::Result<AttachStep, AttachError> {
        self.verify_not_already_attached(event).await?;

        info!(
            exception_record = event.exception_record_id,
            target = %event.target_case_ref,
            ref_type = ?event.target_case_ref_type,
            "Attaching exception record to a case"
        );

        let target_case_ref = match event.target_case_ref_type {
            TargetCaseRefType::CcdReference => event.target_case_ref.clone(),
            TargetCaseRefType::ExternalReference => {
                self.resolve_legacy_reference(event).await?
            }
        };

        match event.classification {
            Classification::Exception | Classification::SupplementaryEvidence => {
                self.attach_documents(event, &target_case_ref).await?;
                Ok(AttachStep::Done(target_case_ref))
            }
            Classification::SupplementaryEvidenceWithOcr => {
                self.update_with_ocr(event, &target_case_ref, ignore_warnings)
                    .await
            }
            Classification::NewApplication => {
                // Rejected during validation; getting here is a bug.
                Err(AttachError::InvalidCaseId(format!(
                    "classification {} cannot be attached",
                    event.classification
                )))
            }
        }
    }

    /// The at-most-once guard: re-fetch the exception record and inspect
    /// its attached-marker before any mutation.
    async fn verify_not_already_attached(
        &self,
        event: &AttachToCaseEventData,
    ) -> std::result::Result<(), AttachError> {
        let record = self
            .store
            .get_case(
                &event.exception_record_id.to_string(),
                &event.exception_record_jurisdiction,
            )
            .await?;

        match record.data_str(fields::ATTACH_TO_CASE_REFERENCE) {
            Some(case_ref) if !case_ref.is_empty() => {
                Err(AttachError::AlreadyAttachedToCase {
                    case_ref: case_ref.to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    async fn resolve_legacy_reference(
        &self,
        event: &AttachToCaseEventData,
    ) -> std::result::Result<String, AttachError> {
        let case_ids = self
            .store
            .get_case_refs_by_legacy_id(&event.target_case_ref, &event.service)
            .await?;

        match case_ids.as_slice() {
            [] => Err(AttachError::CaseNotFound(event.target_case_ref.clone())),
            [case_id] => {
                info!(
                    legacy_ref = %event.target_case_ref,
                    case = case_id,
                    exception_record = event.exception_record_id,
                    "Resolved legacy reference to case"
                );
                Ok(case_id.to_string())
            }
            many => Err(AttachError::MultipleCasesFound {
                reference: event.target_case_ref.clone(),
                case_ids: many.to_vec(),
            }),
        }
    }

    /// The plain document merge (EXCEPTION / SUPPLEMENTARY_EVIDENCE).
    async fn attach_documents(
        &self,
        event: &AttachToCaseEventData,
        target_case_ref: &str,
    ) -> std::result::Result<(), AttachError> {
        let target_case = self
            .store
            .get_case(target_case_ref, &event.exception_record_jurisdiction)
            .await?;
        let target_documents = target_case.scanned_documents();
        let exception_record_ref = event.exception_record_id.to_string();

        documents::verify_no_duplicates(
            &target_documents,
            &event.exception_record_documents,
            &exception_record_ref,
            target_case_ref,
        )?;

        let to_attach = documents::remove_already_attached(
            &event.exception_record_documents,
            &target_documents,
            &exception_record_ref,
        );

        if to_attach.is_empty() {
            info!(
                exception_record = event.exception_record_id,
                case = %target_case_ref,
                "Nothing left to attach"
            );
            return Ok(());
        }

        let stamped =
            documents::stamp_exception_record_reference(&to_attach, &exception_record_ref);

        info!(
            exception_record = event.exception_record_id,
            case = %target_case_ref,
            dcns = ?documents::document_numbers(&stamped),
            "Attaching exception record documents"
        );

        let start = self
            .store
            .start_event(
                &event.credentials,
                &event.exception_record_jurisdiction,
                &target_case.case_type_id,
                Some(target_case_ref),
                fields::EVENT_ATTACH_SCANNED_DOCS,
            )
            .await?;

        let summary = attach_event_summary(
            target_case.id,
            event.exception_record_id,
            &documents::document_numbers(&stamped),
        );
        info!("{summary}");

        let content = CaseDataContent {
            event: CaseEvent {
                id: fields::EVENT_ATTACH_SCANNED_DOCS.to_string(),
                summary,
                description: None,
            },
            event_token: start.token,
            data: documents::supplementary_evidence_data(&stamped, &target_documents),
            case_reference: None,
        };

        self.store
            .submit_event(
                &event.credentials,
                &event.exception_record_jurisdiction,
                &target_case.case_type_id,
                Some(target_case_ref),
                &content,
            )
            .await?;

        info!(
            exception_record = event.exception_record_id,
            case = target_case.id,
            "Attached exception record to case"
        );
        Ok(())
    }

    /// The OCR journey delegates field-level updates to the external
    /// update collaborator.
    async fn update_with_ocr(
        &self,
        event: &AttachToCaseEventData,
        target_case_ref: &str,
        ignore_warnings: bool,
    ) -> std::result::Result<AttachStep, AttachError> {
        let record = event.exception_record.as_ref().ok_or_else(|| {
            // Validation guarantees the projection for this journey.
            AttachError::CaseStore(CaseStoreError::Api {
                status: 500,
                message: "missing exception record projection for OCR journey".into(),
            })
        })?;

        let config = match self.resolver.get(&event.service) {
            Ok(config) => config,
            Err(e) => {
                return Ok(AttachStep::Warnings(ErrorsAndWarnings::with_errors(vec![
                    e.to_string(),
                ])));
            }
        };

        let update_outcome = self
            .updater
            .update_case(
                record,
                config,
                ignore_warnings,
                &event.credentials,
                target_case_ref,
                &event.exception_record_jurisdiction,
            )
            .await
            .map_err(|e| match e {
                Error::CaseStore(inner) => AttachError::CaseStore(inner),
                other => AttachError::CaseStore(CaseStoreError::Transport(other.to_string())),
            })?;

        match update_outcome {
            None => Ok(AttachStep::Done(target_case_ref.to_string())),
            Some(errors_and_warnings) => Ok(AttachStep::Warnings(errors_and_warnings)),
        }
    }
}

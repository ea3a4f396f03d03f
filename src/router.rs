//! Classification router: picks the pipeline branch for an envelope and
//! owns each branch's fallback to an exception record.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::casestore::auth::AuthProvider;
use crate::casestore::types::{CaseDataContent, CaseDetails, CaseEvent};
use crate::casestore::{CaseStore, fields};
use crate::cases::create::{AutoCaseCreator, CaseCreationResult};
use crate::cases::documents;
use crate::cases::exception_record::ExceptionRecordCreator;
use crate::cases::finder::{CaseFinder, FindCaseResult};
use crate::cases::update::{AutoUpdateResult, CaseUpdater};
use crate::clients::payments::PaymentsService;
use crate::clients::processed_envelopes::{EnvelopeCcdAction, EnvelopeProcessingResult};
use crate::config::ServiceConfigResolver;
use crate::envelope::model::{Classification, Envelope};
use crate::error::{Error, Result};

/// Retry budget for potentially-recoverable failures in the automatic
/// creation/update branches. Once a redelivery passes this count the
/// branch falls back to an exception record instead of retrying further.
const MAX_RETRIES_FOR_POTENTIALLY_RECOVERABLE_FAILURES: u32 = 2;

/// Processes one parsed envelope. The consumer depends on this seam so
/// tests can drive the state machine with stub handlers.
#[async_trait]
pub trait EnvelopeHandler: Send + Sync {
    async fn handle(
        &self,
        envelope: &Envelope,
        delivery_count: u32,
    ) -> Result<EnvelopeProcessingResult>;
}

pub struct EnvelopeRouter {
    store: Arc<dyn CaseStore>,
    auth: Arc<dyn AuthProvider>,
    finder: CaseFinder,
    creator: AutoCaseCreator,
    updater: Arc<CaseUpdater>,
    exception_records: ExceptionRecordCreator,
    payments: Arc<PaymentsService>,
    resolver: ServiceConfigResolver,
    document_management_url: String,
}

impl EnvelopeRouter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn CaseStore>,
        auth: Arc<dyn AuthProvider>,
        finder: CaseFinder,
        creator: AutoCaseCreator,
        updater: Arc<CaseUpdater>,
        exception_records: ExceptionRecordCreator,
        payments: Arc<PaymentsService>,
        resolver: ServiceConfigResolver,
        document_management_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            auth,
            finder,
            creator,
            updater,
            exception_records,
            payments,
            resolver,
            document_management_url: document_management_url.into(),
        }
    }

    async fn handle_supplementary_evidence(
        &self,
        envelope: &Envelope,
    ) -> Result<EnvelopeProcessingResult> {
        match self.finder.find_case(envelope).await? {
            FindCaseResult::Found(case) => {
                if self.attach_evidence(envelope, &case).await {
                    self.payments.create_new_payment(envelope, case.id, false).await?;
                    Ok(EnvelopeProcessingResult {
                        ccd_id: case.id,
                        action: EnvelopeCcdAction::AutoAttachedToCase,
                    })
                } else {
                    info!(
                        envelope = %envelope.id,
                        case = case.id,
                        "Attaching supplementary evidence failed; creating exception record"
                    );
                    self.create_exception_record(envelope).await
                }
            }
            FindCaseResult::NotFound => {
                info!(
                    envelope = %envelope.id,
                    zip_file = %envelope.zip_file_name,
                    case_ref = %envelope.case_ref.as_deref().unwrap_or("(NOT PRESENT)"),
                    "Case not found; creating exception record instead"
                );
                self.create_exception_record(envelope).await
            }
            FindCaseResult::MultipleFound(case_ids) => {
                // Never guess which case is correct — route to humans.
                warn!(
                    envelope = %envelope.id,
                    cases = ?case_ids,
                    "Multiple candidate cases; creating exception record for manual triage"
                );
                self.create_exception_record(envelope).await
            }
        }
    }

    async fn handle_new_application(
        &self,
        envelope: &Envelope,
        delivery_count: u32,
    ) -> Result<EnvelopeProcessingResult> {
        match self.creator.create_case(envelope).await? {
            CaseCreationResult::Created(case_id) | CaseCreationResult::AlreadyExists(case_id) => {
                self.payments.create_new_payment(envelope, case_id, false).await?;
                Ok(EnvelopeProcessingResult {
                    ccd_id: case_id,
                    action: EnvelopeCcdAction::AutoCreatedCase,
                })
            }
            CaseCreationResult::AbortedWithoutFailure
            | CaseCreationResult::UnrecoverableFailure => {
                self.create_exception_record(envelope).await
            }
            CaseCreationResult::PotentiallyRecoverableFailure => {
                if delivery_count < MAX_RETRIES_FOR_POTENTIALLY_RECOVERABLE_FAILURES {
                    Err(Error::Processing(
                        "Case creation failed due to a potentially recoverable error".into(),
                    ))
                } else {
                    self.create_exception_record(envelope).await
                }
            }
        }
    }

    async fn handle_supplementary_evidence_with_ocr(
        &self,
        envelope: &Envelope,
        delivery_count: u32,
    ) -> Result<EnvelopeProcessingResult> {
        let auto_update_enabled = self
            .resolver
            .get(&envelope.container)
            .map(|c| c.auto_case_update_enabled)
            .unwrap_or(false);

        if !auto_update_enabled {
            return self.create_exception_record(envelope).await;
        }

        let config = self.resolver.get(&envelope.container)?;
        match self.updater.auto_update(envelope, config, &self.finder).await {
            Ok(AutoUpdateResult::Updated { case_id }) => {
                self.payments.create_new_payment(envelope, case_id, false).await?;
                Ok(EnvelopeProcessingResult {
                    ccd_id: case_id,
                    action: EnvelopeCcdAction::AutoUpdatedCase,
                })
            }
            Ok(AutoUpdateResult::Abandoned) => self.create_exception_record(envelope).await,
            Err(e) => {
                if delivery_count < MAX_RETRIES_FOR_POTENTIALLY_RECOVERABLE_FAILURES {
                    Err(e)
                } else {
                    warn!(
                        envelope = %envelope.id,
                        error = %e,
                        "Update retries exhausted; creating exception record"
                    );
                    self.create_exception_record(envelope).await
                }
            }
        }
    }

    async fn create_exception_record(
        &self,
        envelope: &Envelope,
    ) -> Result<EnvelopeProcessingResult> {
        let ccd_id = self.exception_records.try_create_from(envelope).await?;
        self.payments.create_new_payment(envelope, ccd_id, true).await?;
        Ok(EnvelopeProcessingResult {
            ccd_id,
            action: EnvelopeCcdAction::ExceptionRecord,
        })
    }

    /// Attach envelope documents straight to an existing case. Returns
    /// false on failure — the caller falls back to an exception record, so
    /// attach failures never surface as processing errors.
    async fn attach_evidence(&self, envelope: &Envelope, case: &CaseDetails) -> bool {
        let existing = case.scanned_documents();
        let to_add = documents::envelope_docs_to_add(&existing, &envelope.documents);

        if to_add.is_empty() {
            warn!(
                envelope = %envelope.id,
                case = case.id,
                "Envelope has no new documents; case not updated"
            );
            return true;
        }

        let mapped: Vec<_> = to_add
            .iter()
            .map(|d| {
                documents::map_envelope_document(
                    d,
                    &self.document_management_url,
                    envelope.delivery_date,
                )
                .as_object()
                .cloned()
                .unwrap_or_default()
            })
            .collect();

        let case_ref = case.id.to_string();
        let attempt = async {
            let creds = self.auth.authenticate(&envelope.jurisdiction).await?;
            let start = self
                .store
                .start_event(
                    &creds,
                    &envelope.jurisdiction,
                    &case.case_type_id,
                    Some(&case_ref),
                    fields::EVENT_ATTACH_SCANNED_DOCS,
                )
                .await?;

            let content = CaseDataContent {
                event: CaseEvent {
                    id: fields::EVENT_ATTACH_SCANNED_DOCS.to_string(),
                    summary: "Attach scanned documents".to_string(),
                    description: None,
                },
                event_token: start.token,
                data: documents::supplementary_evidence_data(&mapped, &existing),
                case_reference: None,
            };

            self.store
                .submit_event(
                    &creds,
                    &envelope.jurisdiction,
                    &case.case_type_id,
                    Some(&case_ref),
                    &content,
                )
                .await
        };

        match attempt.await {
            Ok(_) => {
                info!(
                    envelope = %envelope.id,
                    case = case.id,
                    "Attached documents from envelope to case"
                );
                true
            }
            Err(e) => {
                warn!(
                    envelope = %envelope.id,
                    case = case.id,
                    error = %e,
                    "Failed to attach documents from envelope to case"
                );
                false
            }
        }
    }
}

#[async_trait]
impl EnvelopeHandler for EnvelopeRouter {
    async fn handle(
        &self,
        envelope: &Envelope,
        delivery_count: u32,
    ) -> Result<EnvelopeProcessingResult> {
        match envelope.classification {
            Classification::SupplementaryEvidence => {
                self.handle_supplementary_evidence(envelope).await
            }
            Classification::SupplementaryEvidenceWithOcr => {
                self.handle_supplementary_evidence_with_ocr(envelope, delivery_count)
                    .await
            }
            Classification::Exception => self.create_exception_record(envelope).await,
            Classification::NewApplication => {
                self.handle_new_application(envelope, delivery_count).await
            }
        }
    }
}

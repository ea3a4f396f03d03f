//! Case updates driven by the external update collaborator
//! (the OCR-carrying journeys).

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use crate::casestore::auth::{AuthProvider, UserCredentials};
use crate::casestore::types::{CaseDataContent, CaseEvent};
use crate::casestore::CaseStore;
use crate::cases::exception_record::ExceptionRecord;
use crate::cases::finder::{CaseFinder, FindCaseResult};
use crate::cases::ErrorsAndWarnings;
use crate::clients::transformation::UpdateClient;
use crate::config::ServiceConfig;
use crate::envelope::model::Envelope;
use crate::error::{Error, Result, TransformationError};

/// Outcome of the envelope-driven automatic update.
#[derive(Debug)]
pub enum AutoUpdateResult {
    Updated { case_id: i64 },
    /// No usable target case, or the service rejected the update data —
    /// the envelope falls back to an exception record.
    Abandoned,
}

pub struct CaseUpdater {
    store: Arc<dyn CaseStore>,
    auth: Arc<dyn AuthProvider>,
    update_client: Arc<dyn UpdateClient>,
    document_management_url: String,
}

impl CaseUpdater {
    pub fn new(
        store: Arc<dyn CaseStore>,
        auth: Arc<dyn AuthProvider>,
        update_client: Arc<dyn UpdateClient>,
        document_management_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            auth,
            update_client,
            document_management_url: document_management_url.into(),
        }
    }

    /// Callback path: apply an exception record's OCR update to the target
    /// case. Returns `None` on success, or the structured errors/warnings
    /// to send back (two-phase: warnings block unless `ignore_warnings`).
    pub async fn update_case(
        &self,
        exception_record: &ExceptionRecord,
        config: &ServiceConfig,
        ignore_warnings: bool,
        creds: &UserCredentials,
        target_case_ref: &str,
        jurisdiction: &str,
    ) -> Result<Option<ErrorsAndWarnings>> {
        let Some(update_url) = config.update_url.as_deref() else {
            return Ok(Some(ErrorsAndWarnings::with_errors(vec![format!(
                "Update URL is not configured for service {}",
                config.service
            )])));
        };

        let target_case = self.store.get_case(target_case_ref, jurisdiction).await?;

        let response = match self
            .update_client
            .update_case(update_url, exception_record, &json!(target_case))
            .await
        {
            Ok(response) => response,
            Err(TransformationError::Invalid { errors, warnings }) => {
                return Ok(Some(ErrorsAndWarnings { errors, warnings }));
            }
            Err(other) => return Err(other.into()),
        };

        if !ignore_warnings && !response.warnings.is_empty() {
            info!(
                exception_record = %exception_record.id,
                case = %target_case_ref,
                warnings = response.warnings.len(),
                "Update produced warnings; waiting for caller confirmation"
            );
            return Ok(Some(ErrorsAndWarnings::with_warnings(response.warnings)));
        }

        let details = response.case_update_details;
        let start = self
            .store
            .start_event(
                creds,
                jurisdiction,
                &target_case.case_type_id,
                Some(target_case_ref),
                &details.event_id,
            )
            .await?;

        let content = CaseDataContent {
            event: CaseEvent {
                id: details.event_id.clone(),
                summary: "Case updated with OCR data".to_string(),
                description: Some(format!(
                    "Case updated from exception record ref {}",
                    exception_record.id
                )),
            },
            event_token: start.token,
            data: details.case_data,
            case_reference: None,
        };

        self.store
            .submit_event(
                creds,
                jurisdiction,
                &target_case.case_type_id,
                Some(target_case_ref),
                &content,
            )
            .await?;

        info!(
            exception_record = %exception_record.id,
            case = %target_case_ref,
            "Updated case from exception record"
        );
        Ok(None)
    }

    /// Envelope path: resolve the target case and apply the envelope's OCR
    /// update without caseworker involvement.
    pub async fn auto_update(
        &self,
        envelope: &Envelope,
        config: &ServiceConfig,
        finder: &CaseFinder,
    ) -> Result<AutoUpdateResult> {
        let case = match finder.find_case(envelope).await.map_err(Error::from)? {
            FindCaseResult::Found(case) => *case,
            FindCaseResult::NotFound => {
                info!(envelope = %envelope.id, "No case to update for envelope");
                return Ok(AutoUpdateResult::Abandoned);
            }
            FindCaseResult::MultipleFound(case_ids) => {
                warn!(
                    envelope = %envelope.id,
                    cases = ?case_ids,
                    "Multiple candidate cases for update; never guessing"
                );
                return Ok(AutoUpdateResult::Abandoned);
            }
        };

        let Some(update_url) = config.update_url.as_deref() else {
            warn!(
                service = %config.service,
                "Automatic case update enabled but no update URL configured"
            );
            return Ok(AutoUpdateResult::Abandoned);
        };

        let record =
            crate::cases::exception_record::from_envelope(envelope, &self.document_management_url);
        let response = match self
            .update_client
            .update_case(update_url, &record, &json!(case))
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_recoverable() => return Err(e.into()),
            Err(e) => {
                warn!(
                    envelope = %envelope.id,
                    case = case.id,
                    error = %e,
                    "Service rejected automatic update data"
                );
                return Ok(AutoUpdateResult::Abandoned);
            }
        };

        let creds = self.auth.authenticate(&envelope.jurisdiction).await?;
        let case_ref = case.id.to_string();
        let details = response.case_update_details;

        let start = self
            .store
            .start_event(
                &creds,
                &envelope.jurisdiction,
                &case.case_type_id,
                Some(&case_ref),
                &details.event_id,
            )
            .await?;

        let content = CaseDataContent {
            event: CaseEvent {
                id: details.event_id.clone(),
                summary: "Case updated with OCR data".to_string(),
                description: Some(format!("Case updated from envelope {}", envelope.id)),
            },
            event_token: start.token,
            data: details.case_data,
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
            .await?;

        info!(envelope = %envelope.id, case = case.id, "Automatically updated case from envelope");
        Ok(AutoUpdateResult::Updated { case_id: case.id })
    }
}

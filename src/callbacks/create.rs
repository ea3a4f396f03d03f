//! Create-new-case callback orchestration.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::callbacks::CcdCallbackRequest;
use crate::cases::ErrorsAndWarnings;
use crate::cases::create::{CreateResult, NewCaseCreator};
use crate::cases::exception_record::{CallbackType, finalize_exception_record};
use crate::cases::finder::CaseFinder;
use crate::cases::validation;
use crate::clients::payments::PaymentsService;
use crate::config::ServiceConfigResolver;
use crate::error::{AttachError, Result};
use crate::ledger::{LedgerProxy, NewLedgerEntry, RequestType};

pub struct CreateCaseCallbackService {
    resolver: ServiceConfigResolver,
    finder: CaseFinder,
    creator: NewCaseCreator,
    payments: Arc<PaymentsService>,
    ledger: Arc<LedgerProxy>,
}

impl CreateCaseCallbackService {
    pub fn new(
        resolver: ServiceConfigResolver,
        finder: CaseFinder,
        creator: NewCaseCreator,
        payments: Arc<PaymentsService>,
        ledger: Arc<LedgerProxy>,
    ) -> Self {
        Self {
            resolver,
            finder,
            creator,
            payments,
            ledger,
        }
    }

    /// Create a service case from the exception record, or return the
    /// one already created for it.
    pub async fn process(
        &self,
        request: &CcdCallbackRequest,
        idam_token: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<std::result::Result<Map<String, Value>, ErrorsAndWarnings>> {
        if let Err(error) = validation::create_prerequisites(&request.event_id, idam_token, user_id)
        {
            warn!(error = %error, "Create callback failed prerequisite check");
            return Ok(Err(ErrorsAndWarnings::with_errors(vec![error])));
        }

        let service = match validation::service_from_case_type(&request.case_details) {
            Ok(service) => service,
            Err(error) => return Ok(Err(ErrorsAndWarnings::with_errors(vec![error]))),
        };

        let (record, creds) =
            match validation::build_create_request(&request.case_details, idam_token, user_id) {
                Ok(validated) => validated,
                Err(errors) => {
                    warn!(?errors, "Create callback failed validation");
                    return Ok(Err(ErrorsAndWarnings::with_errors(errors)));
                }
            };

        let config = match self.resolver.get(&service) {
            Ok(config) => config,
            Err(e) => return Ok(Err(ErrorsAndWarnings::with_errors(vec![e.to_string()]))),
        };

        let exception_record_id: i64 = record.id.parse().unwrap_or_default();
        let envelope_id = record.envelope_id.clone().unwrap_or_default();

        // Idempotent short-circuit: a case may already have been created
        // from this exception record by an earlier, retried request.
        let existing = self
            .finder
            .find_cases(exception_record_id, &envelope_id, config)
            .await?;

        let case_id = match existing.as_slice() {
            [case_id] => {
                info!(
                    exception_record = %record.id,
                    case = case_id,
                    "Case already exists for exception record - returning it"
                );
                *case_id
            }
            [] => {
                match self
                    .creator
                    .create_new_case(
                        &record,
                        config.transformation_url.as_deref(),
                        &service,
                        request.ignore_warnings,
                        &creds,
                    )
                    .await?
                {
                    CreateResult::Created(case_id) => case_id,
                    CreateResult::Rejected(errors_and_warnings) => {
                        return Ok(Err(errors_and_warnings));
                    }
                }
            }
            many => {
                warn!(exception_record = %record.id, cases = ?many, "Multiple cases for exception record");
                let ids = many
                    .iter()
                    .map(|id| id.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                return Ok(Err(ErrorsAndWarnings::with_errors(vec![format!(
                    "Multiple cases ({ids}) found for exception record {}",
                    record.id
                )])));
            }
        };

        self.ledger
            .store(NewLedgerEntry {
                request_type: RequestType::CreateCase,
                exception_record_id: record.id.clone(),
                case_id: case_id.to_string(),
            })
            .await;

        if let Err(e) = self
            .payments
            .update_payments(
                &request.case_details,
                &record.id,
                &record.po_box_jurisdiction,
                &case_id.to_string(),
            )
            .await
        {
            error!(
                exception_record = %record.id,
                case = case_id,
                error = %e,
                "Failed to send update to payments processor"
            );
            return Ok(Err(ErrorsAndWarnings::with_errors(vec![
                AttachError::PaymentsPublishingFailure.to_string(),
            ])));
        }

        Ok(Ok(finalize_exception_record(
            &request.case_details.data,
            &case_id.to_string(),
            CallbackType::CaseCreation,
        )))
    }
}

//! Case creation engines: the automatic (envelope) path and the
//! callback path, both guarded against concurrent duplicate creation.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::casestore::auth::{AuthProvider, UserCredentials};
use crate::casestore::types::{CaseDataContent, CaseEvent};
use crate::casestore::{CaseStore, fields};
use crate::cases::ErrorsAndWarnings;
use crate::cases::exception_record::ExceptionRecord;
use crate::clients::transformation::{CaseCreationDetails, TransformationClient};
use crate::config::ServiceConfigResolver;
use crate::envelope::model::Envelope;
use crate::error::{Result, TransformationError};

/// Uniform outcome of a creation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseCreationResult {
    Created(i64),
    /// Idempotent short-circuit: a case for this envelope already exists.
    AlreadyExists(i64),
    UnrecoverableFailure,
    PotentiallyRecoverableFailure,
    AbortedWithoutFailure,
}

/// Automatic case creation from a NEW_APPLICATION envelope.
pub struct AutoCaseCreator {
    store: Arc<dyn CaseStore>,
    auth: Arc<dyn AuthProvider>,
    transformation: Arc<dyn TransformationClient>,
    resolver: ServiceConfigResolver,
}

impl AutoCaseCreator {
    pub fn new(
        store: Arc<dyn CaseStore>,
        auth: Arc<dyn AuthProvider>,
        transformation: Arc<dyn TransformationClient>,
        resolver: ServiceConfigResolver,
    ) -> Self {
        Self {
            store,
            auth,
            transformation,
            resolver,
        }
    }

    /// Try to create a case from the envelope.
    ///
    /// `Err` carries infrastructure failures only (classified by the
    /// consumer); every business outcome is a [`CaseCreationResult`].
    pub async fn create_case(&self, envelope: &Envelope) -> Result<CaseCreationResult> {
        info!(
            envelope = %envelope.id,
            zip_file = %envelope.zip_file_name,
            service = %envelope.container,
            "Started attempt to auto create a new case from envelope"
        );

        let config = self.resolver.get(&envelope.container)?;
        if !config.auto_case_creation_enabled {
            info!(
                service = %envelope.container,
                "Automatic case creation is disabled for the service - skipping"
            );
            return Ok(CaseCreationResult::AbortedWithoutFailure);
        }

        let case_ids = self
            .store
            .get_case_refs_by_envelope_id(&envelope.id, &envelope.container)
            .await?;

        match case_ids.as_slice() {
            [] => self.transform_and_create(envelope, config.transformation_url.as_deref()).await,
            [case_id] => {
                warn!(
                    envelope = %envelope.id,
                    case = case_id,
                    "Case already exists for envelope - skipping creation"
                );
                Ok(CaseCreationResult::AlreadyExists(*case_id))
            }
            many => {
                error!(
                    envelope = %envelope.id,
                    cases = ?many,
                    "Multiple cases exist for envelope"
                );
                Ok(CaseCreationResult::UnrecoverableFailure)
            }
        }
    }

    async fn transform_and_create(
        &self,
        envelope: &Envelope,
        transformation_url: Option<&str>,
    ) -> Result<CaseCreationResult> {
        let Some(url) = transformation_url else {
            warn!(
                service = %envelope.container,
                "Automatic case creation enabled but no transformation URL configured"
            );
            return Ok(CaseCreationResult::UnrecoverableFailure);
        };

        let response = match self.transformation.transform_envelope(url, envelope).await {
            Ok(response) => response,
            Err(e) => {
                warn!(envelope = %envelope.id, error = %e, "Failed to transform envelope");
                return Ok(if e.is_recoverable() {
                    CaseCreationResult::PotentiallyRecoverableFailure
                } else {
                    CaseCreationResult::UnrecoverableFailure
                });
            }
        };

        self.create_case_in_store(envelope, response.case_creation_details)
            .await
    }

    async fn create_case_in_store(
        &self,
        envelope: &Envelope,
        details: CaseCreationDetails,
    ) -> Result<CaseCreationResult> {
        let creds = match self.auth.authenticate(&envelope.jurisdiction).await {
            Ok(creds) => creds,
            Err(e) => {
                error!(envelope = %envelope.id, error = %e, "Authentication failed for case creation");
                return Ok(CaseCreationResult::PotentiallyRecoverableFailure);
            }
        };

        let attempt = async {
            let start = self
                .store
                .start_event(
                    &creds,
                    &envelope.jurisdiction,
                    &details.case_type_id,
                    None,
                    &details.event_id,
                )
                .await?;

            let mut data = details.case_data.clone();
            // Audit trail linking the new case back to its envelope.
            data.insert(
                fields::BULK_SCAN_ENVELOPES.to_string(),
                json!([{"value": {"id": envelope.id, "action": "create"}}]),
            );

            let content = CaseDataContent {
                event: CaseEvent {
                    id: start.event_id.clone(),
                    summary: "Case created".to_string(),
                    description: Some(format!("Case created from envelope {}", envelope.id)),
                },
                event_token: start.token,
                data,
                case_reference: None,
            };

            self.store
                .submit_event(&creds, &envelope.jurisdiction, &details.case_type_id, None, &content)
                .await
        };

        match attempt.await {
            Ok(case) => {
                info!(
                    envelope = %envelope.id,
                    case = case.id,
                    "Auto created a case in the store from envelope"
                );
                Ok(CaseCreationResult::Created(case.id))
            }
            Err(e) if e.is_client_error() => {
                error!(
                    envelope = %envelope.id,
                    error = %e,
                    "Store rejected auto case creation"
                );
                Ok(CaseCreationResult::UnrecoverableFailure)
            }
            Err(e) => {
                error!(
                    envelope = %envelope.id,
                    error = %e,
                    "Error while auto creating a case from envelope"
                );
                Ok(CaseCreationResult::PotentiallyRecoverableFailure)
            }
        }
    }
}

/// Outcome of the callback-driven creation.
#[derive(Debug)]
pub enum CreateResult {
    Created(i64),
    Rejected(ErrorsAndWarnings),
}

/// Creates a new case from an exception record on behalf of a caseworker.
pub struct NewCaseCreator {
    store: Arc<dyn CaseStore>,
    transformation: Arc<dyn TransformationClient>,
}

impl NewCaseCreator {
    pub fn new(store: Arc<dyn CaseStore>, transformation: Arc<dyn TransformationClient>) -> Self {
        Self {
            store,
            transformation,
        }
    }

    /// Transform the exception record and create the case.
    ///
    /// Two-phase confirmation: transformation warnings are returned to the
    /// caller unless `ignore_warnings` is set — never acted on silently.
    pub async fn create_new_case(
        &self,
        exception_record: &ExceptionRecord,
        transformation_url: Option<&str>,
        service: &str,
        ignore_warnings: bool,
        creds: &UserCredentials,
    ) -> Result<CreateResult> {
        info!(
            service = %service,
            exception_record = %exception_record.id,
            "Start creating new case from exception record"
        );

        let Some(url) = transformation_url else {
            return Ok(CreateResult::Rejected(ErrorsAndWarnings::with_errors(
                vec![format!("Transformation URL is not configured for service {service}")],
            )));
        };

        let response = match self
            .transformation
            .transform_exception_record(url, exception_record)
            .await
        {
            Ok(response) => response,
            Err(TransformationError::Invalid { errors, warnings }) => {
                return Ok(CreateResult::Rejected(ErrorsAndWarnings { errors, warnings }));
            }
            // 400s are our bug, transport failures are infrastructure —
            // both are logged and rethrown, never swallowed.
            Err(other) => {
                error!(
                    exception_record = %exception_record.id,
                    error = %other,
                    "Failed to receive transformed exception record"
                );
                return Err(other.into());
            }
        };

        if !ignore_warnings && !response.warnings.is_empty() {
            info!(
                exception_record = %exception_record.id,
                warnings = response.warnings.len(),
                "Transformation produced warnings; waiting for caller confirmation"
            );
            return Ok(CreateResult::Rejected(ErrorsAndWarnings::with_warnings(
                response.warnings,
            )));
        }

        let details = response.case_creation_details;
        let jurisdiction = &exception_record.po_box_jurisdiction;

        let start = self
            .store
            .start_event(creds, jurisdiction, &details.case_type_id, None, &details.event_id)
            .await?;

        let mut data = details.case_data;
        // Stamp the originating exception record so redelivered requests
        // can find this case and short-circuit.
        data.insert(
            fields::BULK_SCAN_CASE_REFERENCE.to_string(),
            Value::String(exception_record.id.clone()),
        );

        let content = CaseDataContent {
            event: CaseEvent {
                id: start.event_id.clone(),
                summary: "Case created".to_string(),
                description: Some(format!(
                    "Case created from exception record ref {}",
                    exception_record.id
                )),
            },
            event_token: start.token,
            data,
            case_reference: Some(exception_record.id.clone()),
        };

        let case = self
            .store
            .submit_event(creds, jurisdiction, &details.case_type_id, None, &content)
            .await?;

        info!(
            exception_record = %exception_record.id,
            case = case.id,
            "Created new case from exception record"
        );
        Ok(CreateResult::Created(case.id))
    }
}

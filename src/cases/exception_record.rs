//! Exception records: the case-shaped holding pen for scanned content that
//! could not be dispatched automatically.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::casestore::auth::AuthProvider;
use crate::casestore::types::{CaseDataContent, CaseEvent};
use crate::casestore::{CaseStore, fields};
use crate::cases::documents::map_envelope_document;
use crate::envelope::model::{Classification, Envelope};
use crate::error::CaseStoreError;

/// Which callback produced the finalized field map. Decides which
/// case-reference field the new case id lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackType {
    AttachToCase,
    CaseCreation,
}

/// In-memory projection of an exception record, parsed out of the raw case
/// field map. Only built for journeys that call external collaborators.
#[derive(Debug, Clone, Serialize)]
pub struct ExceptionRecord {
    pub id: String,
    pub case_type_id: String,
    pub envelope_id: Option<String>,
    pub po_box: Option<String>,
    pub po_box_jurisdiction: String,
    pub journey_classification: Classification,
    pub form_type: Option<String>,
    pub delivery_date: Option<String>,
    pub opening_date: Option<String>,
    pub scanned_documents: Vec<Map<String, Value>>,
    pub ocr_data: Vec<(String, Option<String>)>,
}

/// Rewrite the exception record's field map after a successful attach or
/// create. Engine-produced fields overwrite same-named originals; all other
/// original fields pass through unchanged. This map is the only payload
/// returned to the store to close out the callback.
pub fn finalize_exception_record(
    original_fields: &Map<String, Value>,
    case_ref: &str,
    callback_type: CallbackType,
) -> Map<String, Value> {
    let reference_field = match callback_type {
        CallbackType::AttachToCase => fields::ATTACH_TO_CASE_REFERENCE,
        CallbackType::CaseCreation => fields::CASE_REFERENCE,
    };

    let mut finalized = original_fields.clone();
    finalized.insert(
        reference_field.to_string(),
        Value::String(case_ref.to_string()),
    );
    finalized.insert(
        fields::DISPLAY_WARNINGS.to_string(),
        Value::String(fields::NO.to_string()),
    );
    finalized.insert(
        fields::OCR_DATA_VALIDATION_WARNINGS.to_string(),
        Value::Array(Vec::new()),
    );
    finalized
}

/// Build exception-record case data from an envelope.
pub fn map_envelope(envelope: &Envelope, document_management_url: &str) -> Map<String, Value> {
    let yes_no = |flag: bool| if flag { fields::YES } else { fields::NO };

    let scanned_documents: Vec<Value> = envelope
        .documents
        .iter()
        .map(|d| map_envelope_document(d, document_management_url, envelope.delivery_date))
        .collect();

    let ocr_data: Vec<Value> = envelope
        .ocr_data
        .iter()
        .map(|field| json!({"value": {"key": field.name, "value": field.value}}))
        .collect();

    let ocr_warnings: Vec<Value> = envelope
        .ocr_data_validation_warnings
        .iter()
        .map(|w| json!({"value": w}))
        .collect();

    // Envelope case references are only shown for evidence journeys.
    let show_refs = matches!(
        envelope.classification,
        Classification::SupplementaryEvidence | Classification::SupplementaryEvidenceWithOcr
    );
    let case_ref = envelope.case_ref.clone().unwrap_or_default();
    let legacy_ref = envelope.legacy_case_ref.clone().unwrap_or_default();

    let mut data = Map::new();
    data.insert(
        fields::JOURNEY_CLASSIFICATION.into(),
        json!(envelope.classification.as_str()),
    );
    data.insert(fields::PO_BOX.into(), json!(envelope.po_box));
    data.insert(fields::PO_BOX_JURISDICTION.into(), json!(envelope.jurisdiction));
    data.insert(fields::FORM_TYPE.into(), json!(envelope.form_type));
    data.insert(fields::DELIVERY_DATE.into(), json!(envelope.delivery_date));
    data.insert(fields::OPENING_DATE.into(), json!(envelope.opening_date));
    data.insert(fields::SCANNED_DOCUMENTS.into(), Value::Array(scanned_documents));
    data.insert(fields::OCR_DATA.into(), Value::Array(ocr_data));
    data.insert(
        fields::OCR_DATA_VALIDATION_WARNINGS.into(),
        Value::Array(ocr_warnings),
    );
    data.insert(
        fields::DISPLAY_WARNINGS.into(),
        json!(yes_no(!envelope.ocr_data_validation_warnings.is_empty())),
    );
    data.insert(fields::ENVELOPE_ID.into(), json!(envelope.id));
    data.insert(
        fields::CONTAINS_PAYMENTS.into(),
        json!(yes_no(envelope.has_payments())),
    );
    data.insert(
        fields::AWAITING_PAYMENT_DCN_PROCESSING.into(),
        json!(yes_no(envelope.has_payments())),
    );
    data.insert("envelopeCaseReference".into(), json!(case_ref));
    data.insert("envelopeLegacyCaseReference".into(), json!(legacy_ref));
    data.insert(
        "showEnvelopeCaseReference".into(),
        json!(yes_no(show_refs && !case_ref.is_empty())),
    );
    data.insert(
        "showEnvelopeLegacyCaseReference".into(),
        json!(yes_no(show_refs && !legacy_ref.is_empty())),
    );
    data
}

/// Creates exception records from envelopes, guarding against duplicates
/// from redelivered messages.
pub struct ExceptionRecordCreator {
    store: Arc<dyn CaseStore>,
    auth: Arc<dyn AuthProvider>,
    document_management_url: String,
}

impl ExceptionRecordCreator {
    pub fn new(
        store: Arc<dyn CaseStore>,
        auth: Arc<dyn AuthProvider>,
        document_management_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            auth,
            document_management_url: document_management_url.into(),
        }
    }

    /// Create an exception record from the envelope, unless one already
    /// exists for it. Returns the store id of the created or existing
    /// record.
    pub async fn try_create_from(&self, envelope: &Envelope) -> Result<i64, CaseStoreError> {
        let existing = self
            .store
            .get_exception_record_refs_by_envelope_id(&envelope.id, &envelope.container)
            .await?;

        if let Some(first) = existing.first() {
            warn!(
                envelope = %envelope.id,
                existing = ?existing,
                "Exception record(s) already exist for envelope - skipping creation"
            );
            return Ok(*first);
        }

        self.create(envelope).await
    }

    async fn create(&self, envelope: &Envelope) -> Result<i64, CaseStoreError> {
        info!(envelope = %envelope.id, "Creating exception record for envelope");

        let creds = self.auth.authenticate(&envelope.jurisdiction).await?;
        let case_type_id = exception_record_case_type(&envelope.container);

        let start = self
            .store
            .start_event(
                &creds,
                &envelope.jurisdiction,
                &case_type_id,
                None,
                fields::EVENT_CREATE_EXCEPTION,
            )
            .await?;

        let content = CaseDataContent {
            event: CaseEvent {
                id: fields::EVENT_CREATE_EXCEPTION.to_string(),
                summary: "Create an exception record".to_string(),
                description: None,
            },
            event_token: start.token,
            data: map_envelope(envelope, &self.document_management_url),
            case_reference: None,
        };

        let case = self
            .store
            .submit_event(&creds, &envelope.jurisdiction, &case_type_id, None, &content)
            .await?;

        info!(
            envelope = %envelope.id,
            zip_file = %envelope.zip_file_name,
            case = case.id,
            case_type = %case_type_id,
            "Created exception record"
        );

        Ok(case.id)
    }
}

/// Exception-record-shaped projection of an envelope, used when a
/// collaborator expects exception-record input but the pipeline is working
/// straight from the envelope.
pub fn from_envelope(envelope: &Envelope, document_management_url: &str) -> ExceptionRecord {
    ExceptionRecord {
        id: envelope.id.clone(),
        case_type_id: exception_record_case_type(&envelope.container),
        envelope_id: Some(envelope.id.clone()),
        po_box: Some(envelope.po_box.clone()),
        po_box_jurisdiction: envelope.jurisdiction.clone(),
        journey_classification: envelope.classification,
        form_type: envelope.form_type.clone(),
        delivery_date: Some(envelope.delivery_date.to_rfc3339()),
        opening_date: Some(envelope.opening_date.to_rfc3339()),
        scanned_documents: envelope
            .documents
            .iter()
            .map(|d| {
                map_envelope_document(d, document_management_url, envelope.delivery_date)
                    .as_object()
                    .cloned()
                    .unwrap_or_default()
            })
            .collect(),
        ocr_data: envelope
            .ocr_data
            .iter()
            .map(|f| (f.name.clone(), f.value.clone()))
            .collect(),
    }
}

/// `{SERVICE}_ExceptionRecord`, per the store's case-type naming scheme.
pub fn exception_record_case_type(container: &str) -> String {
    format!(
        "{}{}",
        container.to_uppercase(),
        fields::EXCEPTION_RECORD_CASE_TYPE_SUFFIX
    )
}

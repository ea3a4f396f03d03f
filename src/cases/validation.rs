//! Callback request validation.
//!
//! Every independent check runs; failures accumulate into an ordered list
//! and the validated event data is only constructed when the list is empty,
//! so a caller sees every problem in one round trip.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::casestore::auth::UserCredentials;
use crate::casestore::fields;
use crate::cases::exception_record::ExceptionRecord;
use crate::config::{ServiceConfig, ServiceConfigResolver};
use crate::envelope::model::Classification;

/// Case details as they arrive on a callback. Unlike store responses,
/// nothing here can be trusted to be present.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackCaseDetails {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub jurisdiction: Option<String>,
    #[serde(rename = "case_type_id", alias = "caseTypeId", default)]
    pub case_type_id: Option<String>,
    #[serde(rename = "case_data", alias = "data", default)]
    pub data: Map<String, Value>,
}

impl CallbackCaseDetails {
    pub fn data_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(Value::as_str)
    }

    fn has_ocr(&self) -> bool {
        self.data
            .get(fields::OCR_DATA)
            .and_then(Value::as_array)
            .is_some_and(|a| !a.is_empty())
    }
}

/// How the target case is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetCaseRefType {
    /// Store-internal case id.
    CcdReference,
    /// Legacy id from the pre-migration system; must be resolved first.
    ExternalReference,
}

/// Validated, immutable projection of an attach-to-case request.
/// Constructed only after all mandatory validations succeed.
#[derive(Debug, Clone)]
pub struct AttachToCaseEventData {
    pub exception_record_jurisdiction: String,
    pub service: String,
    pub target_case_ref_type: TargetCaseRefType,
    pub target_case_ref: String,
    pub exception_record_id: i64,
    pub exception_record_documents: Vec<Map<String, Value>>,
    pub credentials: UserCredentials,
    pub classification: Classification,
    /// Parsed exception record; only populated for the OCR journey, the
    /// only one that calls the external update collaborator.
    pub exception_record: Option<ExceptionRecord>,
}

type Check<T> = Result<T, String>;

fn note<T>(errors: &mut Vec<String>, check: &Check<T>) {
    if let Err(e) = check {
        errors.push(e.clone());
    }
}

fn has_jurisdiction(case: &CallbackCaseDetails) -> Check<String> {
    case.jurisdiction
        .clone()
        .filter(|j| !j.is_empty())
        .ok_or_else(|| "Invalid jurisdiction supplied".to_string())
}

fn has_an_id(case: &CallbackCaseDetails) -> Check<i64> {
    case.id.ok_or_else(|| "Exception case has no Id".to_string())
}

/// Service name embedded in the case type id (`{SERVICE}_ExceptionRecord`).
pub fn service_from_case_type(case: &CallbackCaseDetails) -> Check<String> {
    has_service_name_in_case_type_id(case)
}

fn has_service_name_in_case_type_id(case: &CallbackCaseDetails) -> Check<String> {
    match case.case_type_id.as_deref() {
        None => Err("No case type ID supplied".to_string()),
        Some(case_type_id) => match case_type_id.strip_suffix(fields::EXCEPTION_RECORD_CASE_TYPE_SUFFIX) {
            Some(service) if !service.is_empty() => Ok(service.to_lowercase()),
            _ => Err(format!("Case type ID ({case_type_id}) has invalid format")),
        },
    }
}

fn has_scanned_record(case: &CallbackCaseDetails) -> Check<Vec<Map<String, Value>>> {
    let documents: Vec<Map<String, Value>> = case
        .data
        .get(fields::SCANNED_DOCUMENTS)
        .and_then(Value::as_array)
        .map(|docs| docs.iter().filter_map(|d| d.as_object().cloned()).collect())
        .unwrap_or_default();

    if documents.is_empty() {
        Err("There were no documents in exception record".to_string())
    } else {
        Ok(documents)
    }
}

fn has_idam_token(idam_token: Option<&str>) -> Check<String> {
    idam_token
        .filter(|t| !t.is_empty())
        .map(String::from)
        .ok_or_else(|| "Callback has no user token received in the header".to_string())
}

fn has_user_id(user_id: Option<&str>) -> Check<String> {
    user_id
        .filter(|u| !u.is_empty())
        .map(String::from)
        .ok_or_else(|| "Callback has no user id received in the header".to_string())
}

fn journey_classification(case: &CallbackCaseDetails) -> Check<Classification> {
    match case.data_str(fields::JOURNEY_CLASSIFICATION) {
        None => Err("No journey classification supplied".to_string()),
        Some(raw) => raw
            .parse()
            .map_err(|_| format!("Invalid journey classification {raw}")),
    }
}

fn classification_allowed_for_attach(case: &CallbackCaseDetails) -> Check<Classification> {
    let classification = journey_classification(case)?;
    match classification {
        Classification::NewApplication => Err(format!(
            "The current journey classification {classification} is not allowed for attaching to case"
        )),
        other => Ok(other),
    }
}

/// Case-reference checks: either the search-driven pair
/// (`searchCaseReferenceType` + `searchCaseReference`) or the plain
/// `attachToCaseReference`.
fn case_reference_type(case: &CallbackCaseDetails) -> Check<TargetCaseRefType> {
    match case.data_str(fields::SEARCH_CASE_REFERENCE_TYPE) {
        None => Ok(TargetCaseRefType::CcdReference),
        Some(fields::CCD_CASE_REFERENCE) => Ok(TargetCaseRefType::CcdReference),
        Some(fields::EXTERNAL_CASE_REFERENCE) => Ok(TargetCaseRefType::ExternalReference),
        Some(other) => Err(format!("Invalid case reference type supplied: {other}")),
    }
}

fn case_reference(case: &CallbackCaseDetails) -> Check<String> {
    let uses_search_fields = case.data.contains_key(fields::SEARCH_CASE_REFERENCE_TYPE);
    let (field, raw) = if uses_search_fields {
        (
            fields::SEARCH_CASE_REFERENCE,
            case.data_str(fields::SEARCH_CASE_REFERENCE),
        )
    } else {
        (
            fields::ATTACH_TO_CASE_REFERENCE,
            case.data_str(fields::ATTACH_TO_CASE_REFERENCE),
        )
    };

    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Err("No case reference supplied".to_string());
    };

    // Store-internal references are numeric; external references are
    // whatever the legacy system issued.
    let needs_numeric = !uses_search_fields
        || case.data_str(fields::SEARCH_CASE_REFERENCE_TYPE) == Some(fields::CCD_CASE_REFERENCE);
    if needs_numeric && !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("Invalid case reference: '{raw}' ({field})"));
    }

    Ok(raw.to_string())
}

fn payments_not_pending(
    case: &CallbackCaseDetails,
    classification: Classification,
    config: &ServiceConfig,
) -> Check<()> {
    let awaiting =
        case.data_str(fields::AWAITING_PAYMENT_DCN_PROCESSING) == Some(fields::YES);
    if !awaiting {
        return Ok(());
    }

    let allowed = config.allow_attach_to_case_before_payments_are_processed
        && matches!(
            classification,
            Classification::Exception
                | Classification::SupplementaryEvidence
                | Classification::SupplementaryEvidenceWithOcr
        );

    if allowed {
        Ok(())
    } else {
        Err("Cannot attach this exception record to a case because its payment \
             DCNs have not been processed yet"
            .to_string())
    }
}

/// Mandatory prerequisites, checked before anything else. The first
/// failure aborts — these are request-shape problems, not field problems.
pub fn attach_prerequisites(
    event_id: &str,
    case: &CallbackCaseDetails,
    idam_token: Option<&str>,
    user_id: Option<&str>,
) -> Result<(), String> {
    if event_id != fields::EVENT_ATTACH_TO_CASE {
        return Err(format!(
            "The {event_id} event is not supported. Please contact service team"
        ));
    }
    can_be_attached_to_case(case)?;
    has_idam_token(idam_token)?;
    has_user_id(user_id)?;
    Ok(())
}

/// Classification-specific attachability rules.
fn can_be_attached_to_case(case: &CallbackCaseDetails) -> Result<(), String> {
    match case.data_str(fields::JOURNEY_CLASSIFICATION) {
        None => Err("No journey classification supplied".to_string()),
        Some("SUPPLEMENTARY_EVIDENCE") => Ok(()),
        Some("SUPPLEMENTARY_EVIDENCE_WITH_OCR") => {
            if case.has_ocr() {
                Ok(())
            } else {
                Err("The 'attach to case' event is not supported for supplementary \
                     evidence with OCR but not containing OCR data"
                    .to_string())
            }
        }
        Some("EXCEPTION") => {
            if case.has_ocr() {
                Err("The 'attach to case' event is not supported for exception \
                     records with OCR"
                    .to_string())
            } else {
                Ok(())
            }
        }
        Some(other) => Err(format!("Invalid journey classification {other}")),
    }
}

/// Run all attach validations, accumulating failures.
pub fn build_attach_event_data(
    case: &CallbackCaseDetails,
    idam_token: Option<&str>,
    user_id: Option<&str>,
    resolver: &ServiceConfigResolver,
) -> Result<AttachToCaseEventData, Vec<String>> {
    let jurisdiction = has_jurisdiction(case);
    let service = has_service_name_in_case_type_id(case);
    let ref_type = case_reference_type(case);
    let reference = case_reference(case);
    let id = has_an_id(case);
    let documents = has_scanned_record(case);
    let token = has_idam_token(idam_token);
    let user = has_user_id(user_id);
    let classification = classification_allowed_for_attach(case);

    // Payment gating needs the classification and service config; when
    // either is itself invalid the failure is already reported above.
    let payments = match (&classification, &service) {
        (Ok(classification), Ok(service)) => match resolver.get(service) {
            Ok(config) => payments_not_pending(case, *classification, config),
            Err(e) => Err(e.to_string()),
        },
        _ => Ok(()),
    };

    // The OCR journey also needs the parsed exception record for the
    // external update collaborator.
    let exception_record = match &classification {
        Ok(Classification::SupplementaryEvidenceWithOcr) => {
            build_exception_record(case).map(Some)
        }
        _ => Ok(None),
    };

    let mut errors = Vec::new();
    note(&mut errors, &jurisdiction);
    note(&mut errors, &service);
    note(&mut errors, &ref_type);
    note(&mut errors, &reference);
    note(&mut errors, &id);
    note(&mut errors, &documents);
    note(&mut errors, &token);
    note(&mut errors, &user);
    note(&mut errors, &classification);
    note(&mut errors, &payments);
    if let Err(record_errors) = &exception_record {
        errors.extend(record_errors.iter().cloned());
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    // All Ok by construction here.
    Ok(AttachToCaseEventData {
        exception_record_jurisdiction: jurisdiction.unwrap(),
        service: service.unwrap(),
        target_case_ref_type: ref_type.unwrap(),
        target_case_ref: reference.unwrap(),
        exception_record_id: id.unwrap(),
        exception_record_documents: documents.unwrap(),
        credentials: UserCredentials::new(token.unwrap(), user.unwrap()),
        classification: classification.unwrap(),
        exception_record: exception_record.unwrap(),
    })
}

/// Prerequisites for the create-new-case callback.
pub fn create_prerequisites(
    event_id: &str,
    idam_token: Option<&str>,
    user_id: Option<&str>,
) -> Result<(), String> {
    if event_id != fields::EVENT_CREATE_NEW_CASE {
        return Err(format!(
            "The {event_id} event is not supported. Please contact service team"
        ));
    }
    has_idam_token(idam_token)?;
    has_user_id(user_id)?;
    Ok(())
}

/// Validations for the create-new-case callback, accumulating failures.
pub fn build_create_request(
    case: &CallbackCaseDetails,
    idam_token: Option<&str>,
    user_id: Option<&str>,
) -> Result<(ExceptionRecord, UserCredentials), Vec<String>> {
    let record = build_exception_record(case);
    let token = has_idam_token(idam_token);
    let user = has_user_id(user_id);

    let mut errors = Vec::new();
    if let Err(record_errors) = &record {
        errors.extend(record_errors.iter().cloned());
    }
    if let Err(e) = &token {
        errors.push(e.clone());
    }
    if let Err(e) = &user {
        errors.push(e.clone());
    }

    if errors.is_empty() {
        Ok((
            record.unwrap(),
            UserCredentials::new(token.unwrap(), user.unwrap()),
        ))
    } else {
        Err(errors)
    }
}

/// Project the raw callback case into the internal exception-record model
/// used for transformation/update requests.
pub fn build_exception_record(case: &CallbackCaseDetails) -> Result<ExceptionRecord, Vec<String>> {
    let id = has_an_id(case);
    let case_type = case
        .case_type_id
        .clone()
        .ok_or_else(|| "No case type ID supplied".to_string());
    let jurisdiction = has_jurisdiction(case);
    let classification = journey_classification(case);

    let mut errors = Vec::new();
    for err in [
        id.as_ref().err(),
        case_type.as_ref().err(),
        jurisdiction.as_ref().err(),
        classification.as_ref().err(),
    ]
    .into_iter()
    .flatten()
    {
        errors.push(err.clone());
    }
    if !errors.is_empty() {
        return Err(errors);
    }

    let ocr_data = case
        .data
        .get(fields::OCR_DATA)
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|e| e.get("value"))
                .map(|kv| {
                    (
                        kv.get("key").and_then(Value::as_str).unwrap_or_default().to_string(),
                        kv.get("value").and_then(Value::as_str).map(String::from),
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    let scanned_documents = case
        .data
        .get(fields::SCANNED_DOCUMENTS)
        .and_then(Value::as_array)
        .map(|docs| docs.iter().filter_map(|d| d.as_object().cloned()).collect())
        .unwrap_or_default();

    Ok(ExceptionRecord {
        id: id.unwrap().to_string(),
        case_type_id: case_type.unwrap(),
        envelope_id: case.data_str(fields::ENVELOPE_ID).map(String::from),
        po_box: case.data_str(fields::PO_BOX).map(String::from),
        po_box_jurisdiction: jurisdiction.unwrap(),
        journey_classification: classification.unwrap(),
        form_type: case.data_str(fields::FORM_TYPE).map(String::from),
        delivery_date: case.data_str(fields::DELIVERY_DATE).map(String::from),
        opening_date: case.data_str(fields::OPENING_DATE).map(String::from),
        scanned_documents,
        ocr_data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::config::ServiceConfig;

    fn make_resolver() -> ServiceConfigResolver {
        ServiceConfigResolver::new(vec![ServiceConfig {
            service: "bulkscan".into(),
            jurisdiction: "BULKSCAN".into(),
            transformation_url: None,
            update_url: None,
            auto_case_creation_enabled: false,
            auto_case_update_enabled: false,
            search_cases_by_envelope_id: false,
            allow_attach_to_case_before_payments_are_processed: false,
        }])
    }

    fn make_case(data: Value) -> CallbackCaseDetails {
        CallbackCaseDetails {
            id: Some(555),
            jurisdiction: Some("BULKSCAN".into()),
            case_type_id: Some("BULKSCAN_ExceptionRecord".into()),
            data: data.as_object().cloned().unwrap_or_default(),
        }
    }

    fn valid_attach_data() -> Value {
        json!({
            "journeyClassification": "SUPPLEMENTARY_EVIDENCE",
            "attachToCaseReference": "1539007368674134",
            "scannedDocuments": [{"value": {"controlNumber": "1001"}}]
        })
    }

    #[test]
    fn valid_request_builds_event_data() {
        let case = make_case(valid_attach_data());
        let event =
            build_attach_event_data(&case, Some("token"), Some("user-1"), &make_resolver())
                .unwrap();
        assert_eq!(event.exception_record_id, 555);
        assert_eq!(event.service, "bulkscan");
        assert_eq!(event.target_case_ref, "1539007368674134");
        assert_eq!(event.target_case_ref_type, TargetCaseRefType::CcdReference);
        assert_eq!(event.classification, Classification::SupplementaryEvidence);
        assert!(event.exception_record.is_none());
    }

    #[test]
    fn failures_accumulate_instead_of_short_circuiting() {
        // Missing documents, missing token, missing user id, and a bad
        // case reference — all reported together.
        let mut case = make_case(json!({
            "journeyClassification": "SUPPLEMENTARY_EVIDENCE",
            "attachToCaseReference": "not-numeric"
        }));
        case.jurisdiction = None;

        let errors =
            build_attach_event_data(&case, None, None, &make_resolver()).unwrap_err();
        assert!(errors.len() >= 4, "expected several errors, got {errors:?}");
        assert!(errors.iter().any(|e| e.contains("jurisdiction")));
        assert!(errors.iter().any(|e| e.contains("no documents")));
        assert!(errors.iter().any(|e| e.contains("Invalid case reference")));
        assert!(errors.iter().any(|e| e.contains("user token")));
    }

    #[test]
    fn new_application_is_not_attachable() {
        let mut data = valid_attach_data();
        data["journeyClassification"] = json!("NEW_APPLICATION");
        let case = make_case(data);
        let errors =
            build_attach_event_data(&case, Some("t"), Some("u"), &make_resolver()).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("NEW_APPLICATION")));
    }

    #[test]
    fn search_reference_fields_take_precedence() {
        let case = make_case(json!({
            "journeyClassification": "SUPPLEMENTARY_EVIDENCE",
            "searchCaseReferenceType": "externalCaseReference",
            "searchCaseReference": "legacy-ref-1",
            "scannedDocuments": [{"value": {"controlNumber": "1001"}}]
        }));
        let event =
            build_attach_event_data(&case, Some("t"), Some("u"), &make_resolver()).unwrap();
        assert_eq!(event.target_case_ref_type, TargetCaseRefType::ExternalReference);
        assert_eq!(event.target_case_ref, "legacy-ref-1");
    }

    #[test]
    fn unknown_search_reference_type_is_rejected() {
        let case = make_case(json!({
            "journeyClassification": "SUPPLEMENTARY_EVIDENCE",
            "searchCaseReferenceType": "somethingElse",
            "searchCaseReference": "123",
            "scannedDocuments": [{"value": {"controlNumber": "1001"}}]
        }));
        let errors =
            build_attach_event_data(&case, Some("t"), Some("u"), &make_resolver()).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("Invalid case reference type")));
    }

    #[test]
    fn pending_payments_block_attach() {
        let mut data = valid_attach_data();
        data["awaitingPaymentDCNProcessing"] = json!("Yes");
        let case = make_case(data);
        let errors =
            build_attach_event_data(&case, Some("t"), Some("u"), &make_resolver()).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("payment")));
    }

    #[test]
    fn pending_payments_allowed_when_service_opts_in() {
        let resolver = ServiceConfigResolver::new(vec![ServiceConfig {
            service: "bulkscan".into(),
            jurisdiction: "BULKSCAN".into(),
            transformation_url: None,
            update_url: None,
            auto_case_creation_enabled: false,
            auto_case_update_enabled: false,
            search_cases_by_envelope_id: false,
            allow_attach_to_case_before_payments_are_processed: true,
        }]);
        let mut data = valid_attach_data();
        data["awaitingPaymentDCNProcessing"] = json!("Yes");
        let case = make_case(data);
        assert!(build_attach_event_data(&case, Some("t"), Some("u"), &resolver).is_ok());
    }

    #[test]
    fn prerequisites_reject_wrong_event_id() {
        let case = make_case(valid_attach_data());
        let err = attach_prerequisites("someOtherEvent", &case, Some("t"), Some("u")).unwrap_err();
        assert!(err.contains("someOtherEvent"));
    }

    #[test]
    fn prerequisites_reject_exception_record_with_ocr() {
        let mut data = valid_attach_data();
        data["journeyClassification"] = json!("EXCEPTION");
        data["scanOCRData"] = json!([{"value": {"key": "name", "value": "John"}}]);
        let case = make_case(data);
        let err = attach_prerequisites(fields::EVENT_ATTACH_TO_CASE, &case, Some("t"), Some("u"))
            .unwrap_err();
        assert!(err.contains("exception records with OCR"));
    }

    #[test]
    fn prerequisites_require_ocr_for_ocr_journey() {
        let mut data = valid_attach_data();
        data["journeyClassification"] = json!("SUPPLEMENTARY_EVIDENCE_WITH_OCR");
        let case = make_case(data);
        let err = attach_prerequisites(fields::EVENT_ATTACH_TO_CASE, &case, Some("t"), Some("u"))
            .unwrap_err();
        assert!(err.contains("not containing OCR data"));
    }

    #[test]
    fn ocr_journey_builds_exception_record_projection() {
        let case = make_case(json!({
            "journeyClassification": "SUPPLEMENTARY_EVIDENCE_WITH_OCR",
            "attachToCaseReference": "1539007368674134",
            "scannedDocuments": [{"value": {"controlNumber": "1001"}}],
            "scanOCRData": [{"value": {"key": "first_name", "value": "John"}}],
            "envelopeId": "envelope-9",
            "formType": "B123"
        }));
        let event =
            build_attach_event_data(&case, Some("t"), Some("u"), &make_resolver()).unwrap();
        let record = event.exception_record.expect("exception record projection");
        assert_eq!(record.id, "555");
        assert_eq!(record.envelope_id.as_deref(), Some("envelope-9"));
        assert_eq!(
            record.ocr_data,
            vec![("first_name".to_string(), Some("John".to_string()))]
        );
    }
}

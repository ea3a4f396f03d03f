//! End-to-end pipeline scenarios over in-memory fakes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};

use scan_orchestrator::callbacks::CcdCallbackRequest;
use scan_orchestrator::cases::attach::{AttachResult, ExceptionRecordAttacher};
use scan_orchestrator::cases::create::{AutoCaseCreator, NewCaseCreator};
use scan_orchestrator::cases::exception_record::ExceptionRecordCreator;
use scan_orchestrator::cases::finder::CaseFinder;
use scan_orchestrator::cases::update::CaseUpdater;
use scan_orchestrator::cases::validation::{CallbackCaseDetails, build_attach_event_data};
use scan_orchestrator::casestore::auth::{AuthProvider, UserCredentials};
use scan_orchestrator::casestore::types::{CaseDataContent, CaseDetails, StartEventResponse};
use scan_orchestrator::casestore::{CaseStore, fields};
use scan_orchestrator::clients::payments::{NoopPaymentsPublisher, PaymentsService};
use scan_orchestrator::clients::processed_envelopes::EnvelopeCcdAction;
use scan_orchestrator::clients::transformation::{
    SuccessfulTransformationResponse, SuccessfulUpdateResponse, TransformationClient, UpdateClient,
};
use scan_orchestrator::config::{ServiceConfig, ServiceConfigResolver};
use scan_orchestrator::envelope::model::{Classification, Document, Envelope};
use scan_orchestrator::error::{CaseStoreError, TransformationError};
use scan_orchestrator::ledger::LedgerProxy;
use scan_orchestrator::router::{EnvelopeHandler, EnvelopeRouter};
use scan_orchestrator::store::{Database, LibSqlBackend};

// ── Fakes ───────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeCaseStore {
    cases: Mutex<HashMap<i64, CaseDetails>>,
    next_id: Mutex<i64>,
}

impl FakeCaseStore {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            cases: Mutex::new(HashMap::new()),
            next_id: Mutex::new(1000),
        })
    }

    fn insert_case(&self, id: i64, case_type_id: &str, jurisdiction: &str, data: Value) {
        self.cases.lock().unwrap().insert(
            id,
            CaseDetails {
                id,
                jurisdiction: jurisdiction.to_string(),
                case_type_id: case_type_id.to_string(),
                data: data.as_object().cloned().unwrap_or_default(),
            },
        );
    }

    fn case(&self, id: i64) -> CaseDetails {
        self.cases.lock().unwrap().get(&id).cloned().expect("case")
    }

    fn case_count(&self) -> usize {
        self.cases.lock().unwrap().len()
    }

    fn search(&self, predicate: impl Fn(&CaseDetails) -> bool) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .cases
            .lock()
            .unwrap()
            .values()
            .filter(|c| predicate(c))
            .map(|c| c.id)
            .collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl CaseStore for FakeCaseStore {
    async fn get_case(
        &self,
        case_ref: &str,
        _jurisdiction: &str,
    ) -> Result<CaseDetails, CaseStoreError> {
        let id: i64 = case_ref.parse().map_err(|_| CaseStoreError::InvalidCaseId {
            case_ref: case_ref.to_string(),
        })?;
        self.cases
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(CaseStoreError::CaseNotFound {
                case_ref: case_ref.to_string(),
            })
    }

    async fn start_event(
        &self,
        _creds: &UserCredentials,
        _jurisdiction: &str,
        _case_type_id: &str,
        case_ref: Option<&str>,
        event_id: &str,
    ) -> Result<StartEventResponse, CaseStoreError> {
        Ok(StartEventResponse {
            event_id: event_id.to_string(),
            token: format!("tok-{}", case_ref.unwrap_or("new")),
            case_details: None,
        })
    }

    async fn submit_event(
        &self,
        _creds: &UserCredentials,
        jurisdiction: &str,
        case_type_id: &str,
        case_ref: Option<&str>,
        content: &CaseDataContent,
    ) -> Result<CaseDetails, CaseStoreError> {
        let mut cases = self.cases.lock().unwrap();
        match case_ref {
            Some(case_ref) => {
                let id: i64 = case_ref.parse().unwrap();
                let case = cases.get_mut(&id).ok_or(CaseStoreError::CaseNotFound {
                    case_ref: case_ref.to_string(),
                })?;
                for (key, value) in &content.data {
                    case.data.insert(key.clone(), value.clone());
                }
                Ok(case.clone())
            }
            None => {
                let mut next = self.next_id.lock().unwrap();
                *next += 1;
                let id = *next;
                let case = CaseDetails {
                    id,
                    jurisdiction: jurisdiction.to_string(),
                    case_type_id: case_type_id.to_string(),
                    data: content.data.clone(),
                };
                cases.insert(id, case.clone());
                Ok(case)
            }
        }
    }

    async fn get_case_refs_by_legacy_id(
        &self,
        legacy_id: &str,
        _service: &str,
    ) -> Result<Vec<i64>, CaseStoreError> {
        Ok(self.search(|c| {
            c.data_str("previousServiceCaseReference") == Some(legacy_id)
        }))
    }

    async fn get_case_refs_by_bulk_scan_reference(
        &self,
        bulk_scan_reference: &str,
        _service: &str,
    ) -> Result<Vec<i64>, CaseStoreError> {
        Ok(self.search(|c| c.data_str(fields::BULK_SCAN_CASE_REFERENCE) == Some(bulk_scan_reference)))
    }

    async fn get_case_refs_by_envelope_id(
        &self,
        envelope_id: &str,
        _service: &str,
    ) -> Result<Vec<i64>, CaseStoreError> {
        Ok(self.search(|c| {
            !c.case_type_id.ends_with(fields::EXCEPTION_RECORD_CASE_TYPE_SUFFIX)
                && c.data
                    .get(fields::BULK_SCAN_ENVELOPES)
                    .and_then(Value::as_array)
                    .is_some_and(|refs| {
                        refs.iter().any(|r| {
                            r["value"]["id"].as_str() == Some(envelope_id)
                        })
                    })
        }))
    }

    async fn get_exception_record_refs_by_envelope_id(
        &self,
        envelope_id: &str,
        _service: &str,
    ) -> Result<Vec<i64>, CaseStoreError> {
        Ok(self.search(|c| {
            c.case_type_id.ends_with(fields::EXCEPTION_RECORD_CASE_TYPE_SUFFIX)
                && c.data_str(fields::ENVELOPE_ID) == Some(envelope_id)
        }))
    }
}

struct FakeAuth;

#[async_trait]
impl AuthProvider for FakeAuth {
    async fn authenticate(&self, _jurisdiction: &str) -> Result<UserCredentials, CaseStoreError> {
        Ok(UserCredentials::new("system-token", "system-user"))
    }
}

/// Programmable transformation/update collaborator.
#[derive(Default)]
struct FakeTransformation {
    warnings: Vec<String>,
    fail_invalid: Option<(Vec<String>, Vec<String>)>,
}

#[async_trait]
impl TransformationClient for FakeTransformation {
    async fn transform_exception_record(
        &self,
        _url: &str,
        _record: &scan_orchestrator::cases::exception_record::ExceptionRecord,
    ) -> Result<SuccessfulTransformationResponse, TransformationError> {
        if let Some((errors, warnings)) = &self.fail_invalid {
            return Err(TransformationError::Invalid {
                errors: errors.clone(),
                warnings: warnings.clone(),
            });
        }
        Ok(serde_json::from_value(json!({
            "case_creation_details": {
                "case_type_id": "Bulk_Scanned",
                "event_id": "createCase",
                "case_data": {"firstName": "John", "lastName": "Smith"}
            },
            "warnings": self.warnings
        }))
        .unwrap())
    }

    async fn transform_envelope(
        &self,
        url: &str,
        envelope: &Envelope,
    ) -> Result<SuccessfulTransformationResponse, TransformationError> {
        let record =
            scan_orchestrator::cases::exception_record::from_envelope(envelope, "http://dm");
        self.transform_exception_record(url, &record).await
    }
}

#[async_trait]
impl UpdateClient for FakeTransformation {
    async fn update_case(
        &self,
        _url: &str,
        _record: &scan_orchestrator::cases::exception_record::ExceptionRecord,
        _existing_case: &Value,
    ) -> Result<SuccessfulUpdateResponse, TransformationError> {
        Ok(serde_json::from_value(json!({
            "case_update_details": {
                "event_id": "updateCase",
                "case_data": {"updated": "yes"}
            },
            "warnings": self.warnings
        }))
        .unwrap())
    }
}

// ── Builders ────────────────────────────────────────────────────────

fn make_resolver() -> ServiceConfigResolver {
    ServiceConfigResolver::new(vec![ServiceConfig {
        service: "bulkscan".into(),
        jurisdiction: "BULKSCAN".into(),
        transformation_url: Some("http://transform".into()),
        update_url: Some("http://update".into()),
        auto_case_creation_enabled: true,
        auto_case_update_enabled: false,
        search_cases_by_envelope_id: false,
        allow_attach_to_case_before_payments_are_processed: false,
    }])
}

fn make_envelope(classification: Classification) -> Envelope {
    Envelope {
        id: "envelope-1".into(),
        case_ref: None,
        legacy_case_ref: None,
        po_box: "PO 12345".into(),
        jurisdiction: "BULKSCAN".into(),
        container: "bulkscan".into(),
        zip_file_name: "zip-file-test.zip".into(),
        form_type: Some("B123".into()),
        delivery_date: Utc::now(),
        opening_date: Utc::now(),
        classification,
        documents: vec![make_document("154565768")],
        payments: vec![],
        ocr_data: vec![],
        ocr_data_validation_warnings: vec![],
    }
}

fn make_document(dcn: &str) -> Document {
    Document {
        file_name: format!("{dcn}.pdf"),
        control_number: dcn.to_string(),
        doc_type: "other".into(),
        subtype: None,
        scanned_at: Utc::now(),
        uuid: "0fa1ab60-f836-43aa-8c65-b07cc9bebceb".into(),
        delivery_date: None,
    }
}

struct Harness {
    store: Arc<FakeCaseStore>,
    router: EnvelopeRouter,
    attacher: Arc<ExceptionRecordAttacher>,
    db: Arc<LibSqlBackend>,
}

async fn make_harness(transformation: FakeTransformation) -> Harness {
    let store = FakeCaseStore::new();
    let auth = Arc::new(FakeAuth);
    let transformation = Arc::new(transformation);
    let resolver = make_resolver();
    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let payments = Arc::new(PaymentsService::new(Arc::new(NoopPaymentsPublisher)));
    let ledger = Arc::new(LedgerProxy::new(db.clone(), 3));

    let updater = Arc::new(CaseUpdater::new(
        store.clone(),
        auth.clone(),
        transformation.clone(),
        "http://dm",
    ));

    let router = EnvelopeRouter::new(
        store.clone(),
        auth.clone(),
        CaseFinder::new(store.clone()),
        AutoCaseCreator::new(
            store.clone(),
            auth.clone(),
            transformation.clone(),
            resolver.clone(),
        ),
        updater.clone(),
        ExceptionRecordCreator::new(store.clone(), auth.clone(), "http://dm"),
        payments.clone(),
        resolver.clone(),
        "http://dm",
    );

    let attacher = Arc::new(ExceptionRecordAttacher::new(
        store.clone(),
        resolver.clone(),
        updater,
        payments,
        ledger,
    ));

    Harness {
        store,
        router,
        attacher,
        db,
    }
}

fn exception_record_case(id: i64, data: Value) -> CallbackCaseDetails {
    CallbackCaseDetails {
        id: Some(id),
        jurisdiction: Some("BULKSCAN".into()),
        case_type_id: Some("BULKSCAN_ExceptionRecord".into()),
        data: data.as_object().cloned().unwrap_or_default(),
    }
}

fn attach_event(
    case: &CallbackCaseDetails,
) -> scan_orchestrator::cases::validation::AttachToCaseEventData {
    build_attach_event_data(case, Some("token"), Some("user-1"), &make_resolver()).unwrap()
}

// ── Scenario 1: supplementary evidence auto-attaches ────────────────

#[tokio::test]
async fn supplementary_evidence_attaches_documents_to_found_case() {
    let harness = make_harness(FakeTransformation::default()).await;
    harness.store.insert_case(
        1539007368674134,
        "Bulk_Scanned",
        "BULKSCAN",
        json!({"scannedDocuments": []}),
    );

    let mut envelope = make_envelope(Classification::SupplementaryEvidence);
    envelope.case_ref = Some("1539007368674134".into());

    let result = harness.router.handle(&envelope, 1).await.unwrap();
    assert_eq!(result.ccd_id, 1539007368674134);
    assert_eq!(result.action, EnvelopeCcdAction::AutoAttachedToCase);

    let case = harness.store.case(1539007368674134);
    let docs = case.scanned_documents();
    assert_eq!(docs.len(), 1);
    assert_eq!(
        docs[0]["value"]["controlNumber"].as_str().unwrap(),
        "154565768"
    );
    assert_eq!(case.data_str(fields::EVIDENCE_HANDLED), Some("No"));
}

#[tokio::test]
async fn supplementary_evidence_without_case_creates_exception_record() {
    let harness = make_harness(FakeTransformation::default()).await;

    let envelope = make_envelope(Classification::SupplementaryEvidence);
    let result = harness.router.handle(&envelope, 1).await.unwrap();

    assert_eq!(result.action, EnvelopeCcdAction::ExceptionRecord);
    let record = harness.store.case(result.ccd_id);
    assert_eq!(record.case_type_id, "BULKSCAN_ExceptionRecord");
    assert_eq!(record.data_str(fields::ENVELOPE_ID), Some("envelope-1"));
}

#[tokio::test]
async fn exception_record_creation_is_idempotent_per_envelope() {
    let harness = make_harness(FakeTransformation::default()).await;
    let envelope = make_envelope(Classification::Exception);

    let first = harness.router.handle(&envelope, 1).await.unwrap();
    let second = harness.router.handle(&envelope, 2).await.unwrap();

    assert_eq!(first.ccd_id, second.ccd_id);
    assert_eq!(harness.store.case_count(), 1);
}

// ── New application ─────────────────────────────────────────────────

#[tokio::test]
async fn new_application_creates_case_automatically() {
    let harness = make_harness(FakeTransformation::default()).await;
    let envelope = make_envelope(Classification::NewApplication);

    let result = harness.router.handle(&envelope, 1).await.unwrap();
    assert_eq!(result.action, EnvelopeCcdAction::AutoCreatedCase);

    let case = harness.store.case(result.ccd_id);
    assert_eq!(case.data_str("firstName"), Some("John"));
    // Audit trail back to the envelope.
    assert!(case.data.get(fields::BULK_SCAN_ENVELOPES).is_some());
}

#[tokio::test]
async fn new_application_redelivery_returns_existing_case() {
    let harness = make_harness(FakeTransformation::default()).await;
    let envelope = make_envelope(Classification::NewApplication);

    let first = harness.router.handle(&envelope, 1).await.unwrap();
    let second = harness.router.handle(&envelope, 2).await.unwrap();

    assert_eq!(first.ccd_id, second.ccd_id);
    assert_eq!(harness.store.case_count(), 1);
}

#[tokio::test]
async fn rejected_transformation_falls_back_to_exception_record() {
    let harness = make_harness(FakeTransformation {
        fail_invalid: Some((vec!["bad OCR".into()], vec![])),
        ..Default::default()
    })
    .await;

    let envelope = make_envelope(Classification::NewApplication);
    let result = harness.router.handle(&envelope, 1).await.unwrap();

    assert_eq!(result.action, EnvelopeCcdAction::ExceptionRecord);
}

// ── Scenario 2: already-attached guard ──────────────────────────────

#[tokio::test]
async fn attaching_an_already_attached_record_fails_without_mutation() {
    let harness = make_harness(FakeTransformation::default()).await;
    harness.store.insert_case(
        99999,
        "Bulk_Scanned",
        "BULKSCAN",
        json!({"scannedDocuments": []}),
    );
    // Exception record already attached to case 12345.
    harness.store.insert_case(
        555,
        "BULKSCAN_ExceptionRecord",
        "BULKSCAN",
        json!({
            "journeyClassification": "SUPPLEMENTARY_EVIDENCE",
            "attachToCaseReference": "12345",
            "scannedDocuments": [{"value": {"controlNumber": "1001"}}]
        }),
    );

    let callback_case = exception_record_case(
        555,
        json!({
            "journeyClassification": "SUPPLEMENTARY_EVIDENCE",
            "attachToCaseReference": "99999",
            "scannedDocuments": [{"value": {"controlNumber": "1001"}}]
        }),
    );
    let event = attach_event(&callback_case);

    let result = harness
        .attacher
        .try_attach_to_case(&event, &callback_case, false)
        .await
        .unwrap();

    match result {
        AttachResult::Rejected(errors_and_warnings) => {
            assert_eq!(
                errors_and_warnings.errors,
                vec!["Exception record is already attached to case 12345".to_string()]
            );
        }
        other => panic!("expected rejection, got {other:?}"),
    }

    // Target case untouched.
    assert!(harness.store.case(99999).scanned_documents().is_empty());
}

// ── Attach idempotency across redeliveries ──────────────────────────

#[tokio::test]
async fn attach_twice_adds_no_duplicate_documents() {
    let harness = make_harness(FakeTransformation::default()).await;
    harness.store.insert_case(
        99999,
        "Bulk_Scanned",
        "BULKSCAN",
        json!({"scannedDocuments": []}),
    );
    let er_data = json!({
        "journeyClassification": "SUPPLEMENTARY_EVIDENCE",
        "attachToCaseReference": "99999",
        "scannedDocuments": [
            {"value": {"controlNumber": "1001", "fileName": "1001.pdf"}},
            {"value": {"controlNumber": "1002", "fileName": "1002.pdf"}}
        ]
    });
    harness
        .store
        .insert_case(555, "BULKSCAN_ExceptionRecord", "BULKSCAN", er_data.clone());

    let callback_case = exception_record_case(555, er_data);
    let event = attach_event(&callback_case);

    // First delivery attaches both documents.
    let first = harness
        .attacher
        .try_attach_to_case(&event, &callback_case, false)
        .await
        .unwrap();
    assert!(matches!(first, AttachResult::Attached { .. }));
    assert_eq!(harness.store.case(99999).scanned_documents().len(), 2);

    // Second delivery (marker not yet set) attaches nothing more.
    let second = harness
        .attacher
        .try_attach_to_case(&event, &callback_case, false)
        .await
        .unwrap();
    assert!(matches!(second, AttachResult::Attached { .. }));
    assert_eq!(harness.store.case(99999).scanned_documents().len(), 2);

    // Ledger shows both completed operations.
    let entries = harness
        .db
        .ledger_entries_for_exception_record("555")
        .await
        .unwrap();
    assert_eq!(entries.len(), 2);

    // Once the marker is set, a third call fails fast.
    {
        let mut cases = harness.store.cases.lock().unwrap();
        cases
            .get_mut(&555)
            .unwrap()
            .data
            .insert("attachToCaseReference".into(), json!("99999"));
    }
    let third = harness
        .attacher
        .try_attach_to_case(&event, &callback_case, false)
        .await
        .unwrap();
    match third {
        AttachResult::Rejected(errors_and_warnings) => {
            assert_eq!(
                errors_and_warnings.errors,
                vec!["Exception record is already attached to case 99999".to_string()]
            );
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn duplicate_documents_from_another_source_are_terminal() {
    let harness = make_harness(FakeTransformation::default()).await;
    // DCN 1001 already on the case, attached by a different exception
    // record.
    harness.store.insert_case(
        99999,
        "Bulk_Scanned",
        "BULKSCAN",
        json!({"scannedDocuments": [
            {"value": {"controlNumber": "1001", "exceptionRecordReference": "777"}}
        ]}),
    );
    let er_data = json!({
        "journeyClassification": "SUPPLEMENTARY_EVIDENCE",
        "attachToCaseReference": "99999",
        "scannedDocuments": [{"value": {"controlNumber": "1001"}}]
    });
    harness
        .store
        .insert_case(555, "BULKSCAN_ExceptionRecord", "BULKSCAN", er_data.clone());

    let callback_case = exception_record_case(555, er_data);
    let event = attach_event(&callback_case);

    let result = harness
        .attacher
        .try_attach_to_case(&event, &callback_case, false)
        .await
        .unwrap();
    match result {
        AttachResult::Rejected(errors_and_warnings) => {
            let message = &errors_and_warnings.errors[0];
            assert!(message.contains("1001"), "got: {message}");
            assert!(message.contains("99999"), "got: {message}");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn legacy_reference_ambiguity_is_terminal() {
    let harness = make_harness(FakeTransformation::default()).await;
    for id in [11111, 22222] {
        harness.store.insert_case(
            id,
            "Bulk_Scanned",
            "BULKSCAN",
            json!({"previousServiceCaseReference": "legacy-9"}),
        );
    }
    let er_data = json!({
        "journeyClassification": "SUPPLEMENTARY_EVIDENCE",
        "searchCaseReferenceType": "externalCaseReference",
        "searchCaseReference": "legacy-9",
        "scannedDocuments": [{"value": {"controlNumber": "1001"}}]
    });
    harness
        .store
        .insert_case(555, "BULKSCAN_ExceptionRecord", "BULKSCAN", er_data.clone());

    let callback_case = exception_record_case(555, er_data);
    let event = attach_event(&callback_case);

    let result = harness
        .attacher
        .try_attach_to_case(&event, &callback_case, false)
        .await
        .unwrap();
    match result {
        AttachResult::Rejected(errors_and_warnings) => {
            let message = &errors_and_warnings.errors[0];
            assert!(message.contains("Multiple cases"), "got: {message}");
            assert!(message.contains("legacy-9"), "got: {message}");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

// ── Case resolution by legacy id ────────────────────────────────────

mod resolution {
    use super::*;
    use scan_orchestrator::cases::finder::FindCaseResult;

    fn legacy_envelope(legacy_ref: &str) -> Envelope {
        let mut envelope = make_envelope(Classification::SupplementaryEvidence);
        envelope.legacy_case_ref = Some(legacy_ref.to_string());
        envelope
    }

    #[tokio::test]
    async fn zero_matches_resolves_to_not_found() {
        let store = FakeCaseStore::new();
        let finder = CaseFinder::new(store.clone());

        let result = finder.find_case(&legacy_envelope("legacy-1")).await.unwrap();
        assert!(matches!(result, FindCaseResult::NotFound));
    }

    #[tokio::test]
    async fn one_match_resolves_to_that_case() {
        let store = FakeCaseStore::new();
        store.insert_case(
            77777,
            "Bulk_Scanned",
            "BULKSCAN",
            json!({"previousServiceCaseReference": "legacy-1"}),
        );
        let finder = CaseFinder::new(store.clone());

        let result = finder.find_case(&legacy_envelope("legacy-1")).await.unwrap();
        match result {
            FindCaseResult::Found(case) => assert_eq!(case.id, 77777),
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn many_matches_are_never_picked_from() {
        let store = FakeCaseStore::new();
        for id in [77777, 88888] {
            store.insert_case(
                id,
                "Bulk_Scanned",
                "BULKSCAN",
                json!({"previousServiceCaseReference": "legacy-1"}),
            );
        }
        let finder = CaseFinder::new(store.clone());

        let result = finder.find_case(&legacy_envelope("legacy-1")).await.unwrap();
        match result {
            FindCaseResult::MultipleFound(ids) => assert_eq!(ids, vec![77777, 88888]),
            other => panic!("expected MultipleFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn store_internal_ref_takes_precedence_over_legacy() {
        let store = FakeCaseStore::new();
        store.insert_case(55555, "Bulk_Scanned", "BULKSCAN", json!({}));
        store.insert_case(
            77777,
            "Bulk_Scanned",
            "BULKSCAN",
            json!({"previousServiceCaseReference": "legacy-1"}),
        );
        let finder = CaseFinder::new(store.clone());

        let mut envelope = legacy_envelope("legacy-1");
        envelope.case_ref = Some("55555".into());

        let result = finder.find_case(&envelope).await.unwrap();
        match result {
            FindCaseResult::Found(case) => assert_eq!(case.id, 55555),
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unresolvable_store_ref_falls_through_to_legacy() {
        let store = FakeCaseStore::new();
        store.insert_case(
            77777,
            "Bulk_Scanned",
            "BULKSCAN",
            json!({"previousServiceCaseReference": "legacy-1"}),
        );
        let finder = CaseFinder::new(store.clone());

        // A case ref the store does not know is a soft miss.
        let mut envelope = legacy_envelope("legacy-1");
        envelope.case_ref = Some("99999999".into());

        let result = finder.find_case(&envelope).await.unwrap();
        match result {
            FindCaseResult::Found(case) => assert_eq!(case.id, 77777),
            other => panic!("expected Found, got {other:?}"),
        }
    }
}

// ── Scenario 3: create-new-case callback ────────────────────────────

mod create_callback {
    use super::*;
    use scan_orchestrator::callbacks::CreateCaseCallbackService;

    fn make_service(
        store: &Arc<FakeCaseStore>,
        db: &Arc<LibSqlBackend>,
        transformation: FakeTransformation,
    ) -> CreateCaseCallbackService {
        CreateCaseCallbackService::new(
            make_resolver(),
            CaseFinder::new(store.clone()),
            NewCaseCreator::new(store.clone(), Arc::new(transformation)),
            Arc::new(PaymentsService::new(Arc::new(NoopPaymentsPublisher))),
            Arc::new(LedgerProxy::new(db.clone(), 3)),
        )
    }

    fn create_request(ignore_warnings: bool) -> CcdCallbackRequest {
        CcdCallbackRequest {
            event_id: "createNewCase".into(),
            case_details: exception_record_case(
                555,
                json!({
                    "journeyClassification": "NEW_APPLICATION",
                    "envelopeId": "envelope-1",
                    "formType": "B123",
                    "scanOCRData": [{"value": {"key": "first_name", "value": "John"}}],
                    "displayWarnings": "Yes"
                }),
            ),
            ignore_warnings,
        }
    }

    #[tokio::test]
    async fn creates_case_and_finalizes_exception_record() {
        let store = FakeCaseStore::new();
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let service = make_service(&store, &db, FakeTransformation::default());

        let result = service
            .process(&create_request(false), Some("token"), Some("user-1"))
            .await
            .unwrap();

        let data = result.expect("finalized field map");
        let new_case_id = data[fields::CASE_REFERENCE].as_str().unwrap();
        assert_eq!(data[fields::DISPLAY_WARNINGS], "No");
        assert_eq!(data[fields::OCR_DATA_VALIDATION_WARNINGS], json!([]));
        // Original fields pass through.
        assert_eq!(data["formType"], "B123");

        // The created case carries the bulk-scan reference back to the
        // exception record.
        let case = store.case(new_case_id.parse().unwrap());
        assert_eq!(case.data_str(fields::BULK_SCAN_CASE_REFERENCE), Some("555"));

        // And the operation landed in the ledger.
        let entries = db.ledger_entries_for_exception_record("555").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].request_type, "create_case");
    }

    #[tokio::test]
    async fn warnings_require_explicit_confirmation() {
        let store = FakeCaseStore::new();
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let service = make_service(
            &store,
            &db,
            FakeTransformation {
                warnings: vec!["middle name missing".into()],
                ..Default::default()
            },
        );

        // First call: warnings returned, nothing created.
        let result = service
            .process(&create_request(false), Some("token"), Some("user-1"))
            .await
            .unwrap();
        let errors_and_warnings = result.expect_err("warnings");
        assert_eq!(errors_and_warnings.warnings, vec!["middle name missing"]);
        assert_eq!(store.case_count(), 0);

        // Second call with ignore_warnings: the case is created.
        let result = service
            .process(&create_request(true), Some("token"), Some("user-1"))
            .await
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(store.case_count(), 1);
    }

    #[tokio::test]
    async fn redelivered_create_returns_existing_case() {
        let store = FakeCaseStore::new();
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let service = make_service(&store, &db, FakeTransformation::default());

        let first = service
            .process(&create_request(false), Some("token"), Some("user-1"))
            .await
            .unwrap()
            .expect("created");
        let second = service
            .process(&create_request(false), Some("token"), Some("user-1"))
            .await
            .unwrap()
            .expect("existing case returned");

        assert_eq!(
            first[fields::CASE_REFERENCE],
            second[fields::CASE_REFERENCE]
        );
        assert_eq!(store.case_count(), 1);
    }
}

// ── Callback endpoints over HTTP ────────────────────────────────────

mod callback_http {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, header};
    use http_body_util::BodyExt;
    use tower::util::ServiceExt;

    use scan_orchestrator::callbacks::{
        AttachToCaseCallbackService, CallbackState, CreateCaseCallbackService, callback_routes,
    };

    fn make_app(harness: &Harness) -> axum::Router {
        callback_routes(CallbackState {
            attach: Arc::new(AttachToCaseCallbackService::new(
                make_resolver(),
                harness.attacher.clone(),
            )),
            create: Arc::new(CreateCaseCallbackService::new(
                make_resolver(),
                CaseFinder::new(harness.store.clone()),
                NewCaseCreator::new(
                    harness.store.clone(),
                    Arc::new(FakeTransformation::default()),
                ),
                Arc::new(PaymentsService::new(Arc::new(NoopPaymentsPublisher))),
                Arc::new(LedgerProxy::new(harness.db.clone(), 3)),
            )),
        })
    }

    fn attach_request_body() -> String {
        json!({
            "event_id": "attachToExistingCase",
            "case_details": {
                "id": 555,
                "jurisdiction": "BULKSCAN",
                "case_type_id": "BULKSCAN_ExceptionRecord",
                "case_data": {
                    "journeyClassification": "SUPPLEMENTARY_EVIDENCE",
                    "attachToCaseReference": "99999",
                    "scannedDocuments": [
                        {"value": {"controlNumber": "1001", "fileName": "1001.pdf"}}
                    ]
                }
            },
            "ignore_warnings": false
        })
        .to_string()
    }

    fn post(uri: &str, body: String, with_user: bool) -> Request<Body> {
        let builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header("authorization", "Bearer user-token");
        let builder = if with_user {
            builder.header("user-id", "user-1")
        } else {
            builder
        };
        builder.body(Body::from(body)).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn attach_callback_returns_finalized_data() {
        let harness = make_harness(FakeTransformation::default()).await;
        harness.store.insert_case(
            99999,
            "Bulk_Scanned",
            "BULKSCAN",
            json!({"scannedDocuments": []}),
        );
        harness.store.insert_case(
            555,
            "BULKSCAN_ExceptionRecord",
            "BULKSCAN",
            json!({
                "journeyClassification": "SUPPLEMENTARY_EVIDENCE",
                "scannedDocuments": [{"value": {"controlNumber": "1001"}}]
            }),
        );

        let app = make_app(&harness);
        let response = app
            .oneshot(post("/callback/attach-to-case", attach_request_body(), true))
            .await
            .unwrap();

        let body = body_json(response).await;
        assert_eq!(body["data"]["attachToCaseReference"], "99999");
        assert!(body.get("errors").is_none());

        // The document landed on the target case.
        assert_eq!(harness.store.case(99999).scanned_documents().len(), 1);
    }

    #[tokio::test]
    async fn attach_callback_without_user_id_reports_error() {
        let harness = make_harness(FakeTransformation::default()).await;
        let app = make_app(&harness);

        let response = app
            .oneshot(post("/callback/attach-to-case", attach_request_body(), false))
            .await
            .unwrap();

        let body = body_json(response).await;
        let errors = body["errors"].as_array().unwrap();
        assert!(
            errors[0].as_str().unwrap().contains("no user id"),
            "got: {errors:?}"
        );
    }

    #[tokio::test]
    async fn create_callback_rejects_wrong_event() {
        let harness = make_harness(FakeTransformation::default()).await;
        let app = make_app(&harness);

        let body = json!({
            "event_id": "attachToExistingCase",
            "case_details": {"id": 555},
            "ignore_warnings": false
        })
        .to_string();

        let response = app
            .oneshot(post("/callback/create-new-case", body, true))
            .await
            .unwrap();

        let parsed = body_json(response).await;
        let errors = parsed["errors"].as_array().unwrap();
        assert!(
            errors[0].as_str().unwrap().contains("not supported"),
            "got: {errors:?}"
        );
    }
}

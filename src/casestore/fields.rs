//! Field names and event ids as defined in the store's case definitions.

/// Target case reference, set on the exception record once attached.
/// Its presence is the single source of truth for "already attached".
pub const ATTACH_TO_CASE_REFERENCE: &str = "attachToCaseReference";

/// Reference entered by the caseworker for the search-driven attach flow.
pub const SEARCH_CASE_REFERENCE: &str = "searchCaseReference";
pub const SEARCH_CASE_REFERENCE_TYPE: &str = "searchCaseReferenceType";

pub const SCANNED_DOCUMENTS: &str = "scannedDocuments";
pub const EVIDENCE_HANDLED: &str = "evidenceHandled";
pub const CASE_REFERENCE: &str = "caseReference";
pub const DISPLAY_WARNINGS: &str = "displayWarnings";
pub const OCR_DATA: &str = "scanOCRData";
pub const OCR_DATA_VALIDATION_WARNINGS: &str = "ocrDataValidationWarnings";
pub const CONTAINS_PAYMENTS: &str = "containsPayments";
pub const AWAITING_PAYMENT_DCN_PROCESSING: &str = "awaitingPaymentDCNProcessing";
pub const JOURNEY_CLASSIFICATION: &str = "journeyClassification";
pub const ENVELOPE_ID: &str = "envelopeId";
pub const PO_BOX: &str = "poBox";
pub const PO_BOX_JURISDICTION: &str = "poBoxJurisdiction";
pub const FORM_TYPE: &str = "formType";
pub const DELIVERY_DATE: &str = "deliveryDate";
pub const OPENING_DATE: &str = "openingDate";

/// Stamp on a newly created service case linking it back to the exception
/// record it was created from.
pub const BULK_SCAN_CASE_REFERENCE: &str = "bulkScanCaseReference";

/// Audit collection on a service case recording which envelopes touched it.
pub const BULK_SCAN_ENVELOPES: &str = "bulkScanEnvelopes";

/// Values of `searchCaseReferenceType`.
pub const CCD_CASE_REFERENCE: &str = "ccdCaseReference";
pub const EXTERNAL_CASE_REFERENCE: &str = "externalCaseReference";

/// Yes/No field values used throughout the case definitions.
pub const YES: &str = "Yes";
pub const NO: &str = "No";

/// Event ids.
pub const EVENT_ATTACH_SCANNED_DOCS: &str = "attachScannedDocs";
pub const EVENT_CREATE_EXCEPTION: &str = "createException";
pub const EVENT_ATTACH_TO_CASE: &str = "attachToExistingCase";
pub const EVENT_CREATE_NEW_CASE: &str = "createNewCase";

/// Case type id suffix for exception records (`{SERVICE}_ExceptionRecord`).
pub const EXCEPTION_RECORD_CASE_TYPE_SUFFIX: &str = "_ExceptionRecord";

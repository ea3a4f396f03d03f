//! Strict envelope parser.
//!
//! Parsing failures are unrecoverable by definition — redelivering a
//! malformed payload cannot fix it — so the consumer dead-letters on any
//! error returned from here.

use crate::envelope::model::Envelope;
use crate::error::ParseError;

/// Parse a raw queue message body into a typed [`Envelope`].
pub fn parse(bytes: &[u8]) -> Result<Envelope, ParseError> {
    serde_json::from_slice(bytes).map_err(|e| ParseError::InvalidMessage(e.to_string()))
}

/// Convenience wrapper for string payloads.
pub fn parse_str(json: &str) -> Result<Envelope, ParseError> {
    parse(json.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::model::Classification;

    fn envelope_json(classification: &str) -> String {
        format!(
            r#"{{
                "id": "eb8257e3-1f11-4a0c-8ba7-f74f7c4cc9a8",
                "case_ref": "1539007368674134",
                "po_box": "PO 12345",
                "jurisdiction": "BULKSCAN",
                "container": "bulkscan",
                "zip_file_name": "zip-file-test.zip",
                "form_type": "B123",
                "delivery_date": "2026-01-14T12:30:00Z",
                "opening_date": "2026-01-14T12:31:00Z",
                "classification": "{classification}",
                "documents": [
                    {{
                        "file_name": "document1.pdf",
                        "control_number": "154565768",
                        "type": "other",
                        "scanned_at": "2026-01-14T12:29:00Z",
                        "uuid": "0fa1ab60-f836-43aa-8c65-b07cc9bebceb"
                    }}
                ],
                "payments": [],
                "ocr_data": [
                    {{"metadata_field_name": "first_name", "metadata_field_value": "John"}}
                ]
            }}"#
        )
    }

    #[test]
    fn parses_a_valid_envelope() {
        let envelope = parse_str(&envelope_json("SUPPLEMENTARY_EVIDENCE")).unwrap();
        assert_eq!(envelope.id, "eb8257e3-1f11-4a0c-8ba7-f74f7c4cc9a8");
        assert_eq!(envelope.case_ref.as_deref(), Some("1539007368674134"));
        assert_eq!(envelope.classification, Classification::SupplementaryEvidence);
        assert_eq!(envelope.documents.len(), 1);
        assert_eq!(envelope.documents[0].control_number, "154565768");
        assert_eq!(envelope.ocr_data.len(), 1);
        assert!(envelope.ocr_data_validation_warnings.is_empty());
    }

    #[test]
    fn classification_is_case_insensitive_on_the_wire() {
        let envelope = parse_str(&envelope_json("supplementary_evidence_with_ocr")).unwrap();
        assert_eq!(
            envelope.classification,
            Classification::SupplementaryEvidenceWithOcr
        );
    }

    #[test]
    fn rejects_unknown_classification() {
        let err = parse_str(&envelope_json("SOMETHING_ELSE")).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("SOMETHING_ELSE"), "got: {msg}");
    }

    #[test]
    fn rejects_garbage_bytes() {
        assert!(parse(b"not json at all").is_err());
    }

    #[test]
    fn rejects_missing_required_fields() {
        // No jurisdiction.
        let err = parse_str(
            r#"{"id": "x", "po_box": "1", "container": "c",
                "zip_file_name": "z.zip", "delivery_date": "2026-01-14T12:30:00Z",
                "opening_date": "2026-01-14T12:31:00Z",
                "classification": "EXCEPTION", "documents": []}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("jurisdiction"));
    }

    #[test]
    fn accepts_camel_case_aliases() {
        let envelope = parse_str(
            r#"{"id": "x", "caseRef": "123", "legacyCaseRef": "abc", "poBox": "1",
                "jurisdiction": "BULKSCAN", "container": "bulkscan",
                "zipFileName": "z.zip", "deliveryDate": "2026-01-14T12:30:00Z",
                "openingDate": "2026-01-14T12:31:00Z",
                "classification": "EXCEPTION", "documents": []}"#,
        )
        .unwrap();
        assert_eq!(envelope.case_ref.as_deref(), Some("123"));
        assert_eq!(envelope.legacy_case_ref.as_deref(), Some("abc"));
        assert_eq!(envelope.zip_file_name, "z.zip");
    }

    #[test]
    fn optional_fields_default_when_absent() {
        let envelope = parse_str(
            r#"{"id": "x", "po_box": "1", "jurisdiction": "BULKSCAN",
                "container": "bulkscan", "zip_file_name": "z.zip",
                "delivery_date": "2026-01-14T12:30:00Z",
                "opening_date": "2026-01-14T12:31:00Z",
                "classification": "NEW_APPLICATION", "documents": []}"#,
        )
        .unwrap();
        assert!(envelope.case_ref.is_none());
        assert!(envelope.legacy_case_ref.is_none());
        assert!(envelope.form_type.is_none());
        assert!(envelope.payments.is_empty());
        assert!(envelope.ocr_data.is_empty());
        assert!(!envelope.has_payments());
    }
}

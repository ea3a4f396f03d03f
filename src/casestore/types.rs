//! Data shapes on the case-store interface.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::casestore::fields;

/// A case as returned by the store. `data` is the raw field map — the case
/// definitions are owned by the services, so the orchestrator treats the
/// map as opaque except for the well-known fields in [`fields`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseDetails {
    pub id: i64,
    pub jurisdiction: String,
    #[serde(rename = "case_type_id", alias = "caseTypeId")]
    pub case_type_id: String,
    #[serde(rename = "case_data", alias = "data", default)]
    pub data: Map<String, Value>,
}

impl CaseDetails {
    /// Fetch a string field from the case data, treating absent and
    /// non-string values as missing.
    pub fn data_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(Value::as_str)
    }

    /// The scanned-documents collection, empty if absent.
    pub fn scanned_documents(&self) -> Vec<Map<String, Value>> {
        self.data
            .get(fields::SCANNED_DOCUMENTS)
            .and_then(Value::as_array)
            .map(|docs| {
                docs.iter()
                    .filter_map(|d| d.as_object().cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Response to starting an event: the token must be echoed on submit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartEventResponse {
    #[serde(rename = "event_id", alias = "eventId")]
    pub event_id: String,
    pub token: String,
    #[serde(rename = "case_details", alias = "caseDetails", default)]
    pub case_details: Option<CaseDetails>,
}

/// Event descriptor submitted alongside case data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseEvent {
    pub id: String,
    pub summary: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Payload for submitting an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseDataContent {
    pub event: CaseEvent,
    #[serde(rename = "event_token")]
    pub event_token: String,
    pub data: Map<String, Value>,
    /// Bulk-scan case reference stamped on creation submissions.
    #[serde(rename = "case_reference", default, skip_serializing_if = "Option::is_none")]
    pub case_reference: Option<String>,
}

/// Wrap a value in the store's collection-element convention.
pub fn collection_element(value: Value) -> Value {
    let mut element = Map::new();
    element.insert("value".to_string(), value);
    Value::Object(element)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_case(data: Value) -> CaseDetails {
        CaseDetails {
            id: 1539007368674134,
            jurisdiction: "BULKSCAN".into(),
            case_type_id: "Bulk_Scanned".into(),
            data: data.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn data_str_reads_string_fields_only() {
        let case = make_case(json!({
            "attachToCaseReference": "12345",
            "someNumber": 7
        }));
        assert_eq!(case.data_str("attachToCaseReference"), Some("12345"));
        assert_eq!(case.data_str("someNumber"), None);
        assert_eq!(case.data_str("missing"), None);
    }

    #[test]
    fn scanned_documents_defaults_to_empty() {
        let case = make_case(json!({}));
        assert!(case.scanned_documents().is_empty());
    }

    #[test]
    fn scanned_documents_extracts_collection() {
        let case = make_case(json!({
            "scannedDocuments": [
                {"value": {"controlNumber": "1001"}},
                {"value": {"controlNumber": "1002"}}
            ]
        }));
        assert_eq!(case.scanned_documents().len(), 2);
    }

    #[test]
    fn case_details_parses_store_response() {
        let case: CaseDetails = serde_json::from_value(json!({
            "id": 42,
            "jurisdiction": "BULKSCAN",
            "case_type_id": "BULKSCAN_ExceptionRecord",
            "case_data": {"journeyClassification": "EXCEPTION"}
        }))
        .unwrap();
        assert_eq!(case.id, 42);
        assert_eq!(case.data_str("journeyClassification"), Some("EXCEPTION"));
    }
}

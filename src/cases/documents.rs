//! Scanned-document collection helpers.
//!
//! Case data keeps scanned documents as collection elements:
//! `{"value": {"controlNumber": ..., "exceptionRecordReference": ...}}`.
//! The control number (DCN) is the natural key; all set operations here
//! work on DCNs.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use tracing::warn;

use crate::casestore::fields;
use crate::casestore::types::collection_element;
use crate::envelope::model::Document;
use crate::error::AttachError;

/// DCN of a scanned-document collection element, empty string if absent.
pub fn document_id(document: &Map<String, Value>) -> &str {
    document
        .get("value")
        .and_then(Value::as_object)
        .and_then(|value| value.get("controlNumber"))
        .and_then(Value::as_str)
        .unwrap_or("")
}

/// The exception record a document was attached from, if stamped.
pub fn exception_record_reference(document: &Map<String, Value>) -> Option<&str> {
    document
        .get("value")
        .and_then(Value::as_object)
        .and_then(|value| value.get("exceptionRecordReference"))
        .and_then(Value::as_str)
}

/// All DCNs in a collection, in order.
pub fn document_numbers(documents: &[Map<String, Value>]) -> Vec<String> {
    documents
        .iter()
        .map(|d| document_id(d).to_string())
        .collect()
}

fn dcn_set<'a>(documents: impl Iterator<Item = &'a Map<String, Value>>) -> BTreeSet<&'a str> {
    documents
        .map(document_id)
        .filter(|dcn| !dcn.is_empty())
        .collect()
}

/// Intersection of exception-record DCNs with the subset of target-case
/// documents selected by `target_filter`.
fn documents_intersection<'a, F>(
    exception_record_documents: &'a [Map<String, Value>],
    target_case_documents: &'a [Map<String, Value>],
    target_filter: F,
) -> Vec<String>
where
    F: Fn(&Map<String, Value>) -> bool,
{
    let target_dcns = dcn_set(target_case_documents.iter().filter(|d| target_filter(d)));
    dcn_set(exception_record_documents.iter())
        .into_iter()
        .filter(|dcn| target_dcns.contains(dcn))
        .map(String::from)
        .collect()
}

/// Verify the exception record adds no documents that clash with documents
/// attached from *other* sources. Documents the same exception record
/// already attached are not clashes — they make retries safe and are only
/// logged.
pub fn verify_no_duplicates(
    target_case_documents: &[Map<String, Value>],
    exception_record_documents: &[Map<String, Value>],
    exception_record_ref: &str,
    target_case_ref: &str,
) -> Result<(), AttachError> {
    let already_attached = documents_intersection(
        exception_record_documents,
        target_case_documents,
        |doc| exception_record_reference(doc) == Some(exception_record_ref),
    );

    if already_attached.len() == exception_record_documents.len()
        && !exception_record_documents.is_empty()
    {
        warn!(
            exception_record = %exception_record_ref,
            case = %target_case_ref,
            "All documents from exception record have already been attached to case"
        );
    } else if !already_attached.is_empty() {
        warn!(
            exception_record = %exception_record_ref,
            case = %target_case_ref,
            dcns = ?already_attached,
            "Some documents have already been attached from this exception record to case"
        );
    }

    let clashing = documents_intersection(
        exception_record_documents,
        target_case_documents,
        |doc| exception_record_reference(doc) != Some(exception_record_ref),
    );

    if clashing.is_empty() {
        Ok(())
    } else {
        Err(AttachError::DuplicateDocuments {
            case_ref: target_case_ref.to_string(),
            dcns: clashing,
        })
    }
}

/// The documents still to be attached: exception-record documents minus
/// those already on the target case for this same exception record.
/// Resolving twice with identical inputs yields the same set — an empty
/// remainder makes a retried delivery a no-op.
pub fn remove_already_attached(
    exception_record_documents: &[Map<String, Value>],
    target_case_documents: &[Map<String, Value>],
    exception_record_ref: &str,
) -> Vec<Map<String, Value>> {
    let attached_dcns = dcn_set(target_case_documents.iter().filter(|doc| {
        exception_record_reference(doc) == Some(exception_record_ref)
    }));

    exception_record_documents
        .iter()
        .filter(|doc| !attached_dcns.contains(document_id(doc)))
        .cloned()
        .collect()
}

/// Stamp each document with the exception record it came from before
/// merging into the target case.
pub fn stamp_exception_record_reference(
    documents: &[Map<String, Value>],
    exception_record_ref: &str,
) -> Vec<Map<String, Value>> {
    documents
        .iter()
        .map(|doc| {
            let mut value = doc
                .get("value")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            value.insert(
                "exceptionRecordReference".to_string(),
                Value::String(exception_record_ref.to_string()),
            );
            let mut element = Map::new();
            element.insert("value".to_string(), Value::Object(value));
            element
        })
        .collect()
}

/// Merged scanned-documents collection: existing first, new appended.
pub fn concat_documents(
    new_documents: &[Map<String, Value>],
    existing_documents: &[Map<String, Value>],
) -> Vec<Value> {
    existing_documents
        .iter()
        .chain(new_documents.iter())
        .cloned()
        .map(Value::Object)
        .collect()
}

/// Map an envelope document to the case-definition scanned-document shape.
pub fn map_envelope_document(
    document: &Document,
    document_management_url: &str,
    envelope_delivery_date: DateTime<Utc>,
) -> Value {
    let doc_type = document
        .subtype
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or(&document.doc_type);

    collection_element(json!({
        "fileName": document.file_name,
        "controlNumber": document.control_number,
        "type": doc_type,
        "scannedDate": document.scanned_at,
        "deliveryDate": document.delivery_date.unwrap_or(envelope_delivery_date),
        "url": {
            "document_url": format!("{document_management_url}/documents/{}", document.uuid),
            "document_filename": document.file_name,
        }
    }))
}

/// Envelope documents not yet present on the case, keyed by DCN.
pub fn envelope_docs_to_add<'a>(
    existing_case_documents: &[Map<String, Value>],
    envelope_documents: &'a [Document],
) -> Vec<&'a Document> {
    let existing = dcn_set(existing_case_documents.iter());
    envelope_documents
        .iter()
        .filter(|doc| !existing.contains(doc.control_number.as_str()))
        .collect()
}

/// Case-data fragment for a plain supplementary-evidence merge.
pub fn supplementary_evidence_data(
    new_documents: &[Map<String, Value>],
    existing_documents: &[Map<String, Value>],
) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert(
        fields::SCANNED_DOCUMENTS.to_string(),
        Value::Array(concat_documents(new_documents, existing_documents)),
    );
    data.insert(
        fields::EVIDENCE_HANDLED.to_string(),
        Value::String(fields::NO.to_string()),
    );
    data
}

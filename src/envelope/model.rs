//! Typed envelope as it arrives on the inbound queue.
//!
//! Field names on the wire are snake_case; camelCase aliases are accepted
//! for compatibility with older producers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Business category of an envelope. Governs which pipeline branch
/// handles it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    NewApplication,
    SupplementaryEvidence,
    SupplementaryEvidenceWithOcr,
    Exception,
}

impl Classification {
    /// Canonical wire spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewApplication => "NEW_APPLICATION",
            Self::SupplementaryEvidence => "SUPPLEMENTARY_EVIDENCE",
            Self::SupplementaryEvidenceWithOcr => "SUPPLEMENTARY_EVIDENCE_WITH_OCR",
            Self::Exception => "EXCEPTION",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Classification {
    type Err = ParseError;

    /// Case-insensitive for backward compatibility; unknown values are
    /// rejected, never defaulted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NEW_APPLICATION" => Ok(Self::NewApplication),
            "SUPPLEMENTARY_EVIDENCE" => Ok(Self::SupplementaryEvidence),
            "SUPPLEMENTARY_EVIDENCE_WITH_OCR" => Ok(Self::SupplementaryEvidenceWithOcr),
            "EXCEPTION" => Ok(Self::Exception),
            other => Err(ParseError::UnknownClassification(other.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for Classification {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl Serialize for Classification {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// A scanned document inside an envelope. The control number (DCN) is the
/// document's natural key and must be unique within a case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "file_name", alias = "fileName")]
    pub file_name: String,
    #[serde(rename = "control_number", alias = "controlNumber")]
    pub control_number: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(rename = "scanned_at", alias = "scannedAt")]
    pub scanned_at: DateTime<Utc>,
    pub uuid: String,
    #[serde(rename = "delivery_date", alias = "deliveryDate", default)]
    pub delivery_date: Option<DateTime<Utc>>,
}

/// A single OCR field extracted from the scanned form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrDataField {
    #[serde(rename = "metadata_field_name", alias = "name")]
    pub name: String,
    #[serde(rename = "metadata_field_value", alias = "value", default)]
    pub value: Option<String>,
}

/// Payment DCN reference carried by an envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopePayment {
    #[serde(rename = "document_control_number", alias = "documentControlNumber")]
    pub document_control_number: String,
}

/// The inbound unit of work: one scanned submission and its documents.
/// Immutable once parsed; lives for a single message-processing cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    #[serde(rename = "case_ref", alias = "caseRef", default)]
    pub case_ref: Option<String>,
    #[serde(
        rename = "previous_service_case_ref",
        alias = "legacyCaseRef",
        default
    )]
    pub legacy_case_ref: Option<String>,
    #[serde(rename = "po_box", alias = "poBox")]
    pub po_box: String,
    pub jurisdiction: String,
    pub container: String,
    #[serde(rename = "zip_file_name", alias = "zipFileName")]
    pub zip_file_name: String,
    #[serde(rename = "form_type", alias = "formType", default)]
    pub form_type: Option<String>,
    #[serde(rename = "delivery_date", alias = "deliveryDate")]
    pub delivery_date: DateTime<Utc>,
    #[serde(rename = "opening_date", alias = "openingDate")]
    pub opening_date: DateTime<Utc>,
    pub classification: Classification,
    pub documents: Vec<Document>,
    #[serde(default)]
    pub payments: Vec<EnvelopePayment>,
    #[serde(rename = "ocr_data", alias = "ocrData", default)]
    pub ocr_data: Vec<OcrDataField>,
    #[serde(
        rename = "ocr_data_validation_warnings",
        alias = "ocrDataValidationWarnings",
        default
    )]
    pub ocr_data_validation_warnings: Vec<String>,
}

impl Envelope {
    /// Whether the envelope carries any payment DCNs.
    pub fn has_payments(&self) -> bool {
        !self.payments.is_empty()
    }
}

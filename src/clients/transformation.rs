//! Transformation and update collaborators.
//!
//! Services own the shape of their cases; these endpoints turn an
//! exception record (or a raw envelope) into case data. Response statuses
//! carry meaning: 400 is our bug, 422 is a structured validation outcome,
//! anything else non-2xx is a transport-level failure classified by status
//! class.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cases::exception_record::ExceptionRecord;
use crate::envelope::model::Envelope;
use crate::error::TransformationError;

/// Case-creation data produced by a service's transformation endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct CaseCreationDetails {
    #[serde(rename = "case_type_id", alias = "caseTypeId")]
    pub case_type_id: String,
    #[serde(rename = "event_id", alias = "eventId")]
    pub event_id: String,
    #[serde(rename = "case_data", alias = "caseData")]
    pub case_data: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuccessfulTransformationResponse {
    #[serde(rename = "case_creation_details", alias = "caseCreationDetails")]
    pub case_creation_details: CaseCreationDetails,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Case-update data produced by a service's update endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct CaseUpdateDetails {
    #[serde(rename = "event_id", alias = "eventId")]
    pub event_id: String,
    #[serde(rename = "case_data", alias = "caseData")]
    pub case_data: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuccessfulUpdateResponse {
    #[serde(rename = "case_update_details", alias = "caseUpdateDetails")]
    pub case_update_details: CaseUpdateDetails,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Body of a 422 response.
#[derive(Debug, Clone, Default, Deserialize)]
struct ClientServiceErrorResponse {
    #[serde(default)]
    errors: Vec<String>,
    #[serde(default)]
    warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
struct TransformationRequest<'a> {
    exception_record: &'a ExceptionRecord,
}

#[derive(Debug, Serialize)]
struct EnvelopeTransformationRequest<'a> {
    envelope: &'a Envelope,
}

#[derive(Debug, Serialize)]
struct UpdateRequest<'a> {
    exception_record: &'a ExceptionRecord,
    case_details: &'a Value,
}

/// Transformation collaborator interface.
#[async_trait]
pub trait TransformationClient: Send + Sync {
    async fn transform_exception_record(
        &self,
        url: &str,
        exception_record: &ExceptionRecord,
    ) -> Result<SuccessfulTransformationResponse, TransformationError>;

    async fn transform_envelope(
        &self,
        url: &str,
        envelope: &Envelope,
    ) -> Result<SuccessfulTransformationResponse, TransformationError>;
}

/// Update collaborator interface.
#[async_trait]
pub trait UpdateClient: Send + Sync {
    async fn update_case(
        &self,
        url: &str,
        exception_record: &ExceptionRecord,
        existing_case: &Value,
    ) -> Result<SuccessfulUpdateResponse, TransformationError>;
}

/// HTTP implementation of both collaborator interfaces.
pub struct HttpTransformationClient {
    http: reqwest::Client,
}

impl HttpTransformationClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        body: &impl Serialize,
    ) -> Result<T, TransformationError> {
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| TransformationError::Transport(e.to_string()))?;

        match response.status().as_u16() {
            200..=299 => response
                .json()
                .await
                .map_err(|e| TransformationError::Transport(e.to_string())),
            400 => {
                let message = response.text().await.unwrap_or_default();
                Err(TransformationError::CallerError(message))
            }
            422 => {
                let parsed: ClientServiceErrorResponse =
                    response.json().await.unwrap_or_default();
                Err(TransformationError::Invalid {
                    errors: parsed.errors,
                    warnings: parsed.warnings,
                })
            }
            status => {
                let message = response.text().await.unwrap_or_default();
                Err(TransformationError::Api { status, message })
            }
        }
    }
}

#[async_trait]
impl TransformationClient for HttpTransformationClient {
    async fn transform_exception_record(
        &self,
        url: &str,
        exception_record: &ExceptionRecord,
    ) -> Result<SuccessfulTransformationResponse, TransformationError> {
        self.post(url, &TransformationRequest { exception_record })
            .await
    }

    async fn transform_envelope(
        &self,
        url: &str,
        envelope: &Envelope,
    ) -> Result<SuccessfulTransformationResponse, TransformationError> {
        self.post(url, &EnvelopeTransformationRequest { envelope })
            .await
    }
}

#[async_trait]
impl UpdateClient for HttpTransformationClient {
    async fn update_case(
        &self,
        url: &str,
        exception_record: &ExceptionRecord,
        existing_case: &Value,
    ) -> Result<SuccessfulUpdateResponse, TransformationError> {
        self.post(
            url,
            &UpdateRequest {
                exception_record,
                case_details: existing_case,
            },
        )
        .await
    }
}

//! HTTP implementation of [`CaseStore`].

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::casestore::api::CaseStore;
use crate::casestore::auth::{AuthProvider, UserCredentials};
use crate::casestore::types::{CaseDataContent, CaseDetails, StartEventResponse};
use crate::error::CaseStoreError;

/// Search fields understood by the store's search endpoint.
const LEGACY_REF_FIELD: &str = "data.previousServiceCaseReference";
const BULK_SCAN_REF_FIELD: &str = "data.bulkScanCaseReference";
const CASE_ENVELOPE_ID_FIELD: &str = "data.bulkScanEnvelopes.value.id";
const EXCEPTION_RECORD_ENVELOPE_ID_FIELD: &str = "data.envelopeId";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    cases: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: i64,
}

/// Case-store client over HTTP. The envelope path authenticates through the
/// injected [`AuthProvider`]; callback-path calls carry the requester's own
/// credentials.
pub struct HttpCaseStore {
    http: reqwest::Client,
    base_url: String,
    auth: Arc<dyn AuthProvider>,
    /// Service-to-service token attached to every call.
    service_token: Option<SecretString>,
}

impl HttpCaseStore {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        auth: Arc<dyn AuthProvider>,
        service_token: Option<SecretString>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            auth,
            service_token,
        }
    }

    fn with_auth_headers(
        &self,
        request: reqwest::RequestBuilder,
        creds: &UserCredentials,
    ) -> reqwest::RequestBuilder {
        let request = request.bearer_auth(creds.user_token.expose_secret());
        match &self.service_token {
            Some(token) => request.header("ServiceAuthorization", token.expose_secret()),
            None => request,
        }
    }

    async fn search_refs(
        &self,
        service: &str,
        exception_records: bool,
        field: &str,
        value: &str,
    ) -> Result<Vec<i64>, CaseStoreError> {
        let creds = self.auth.authenticate(service).await?;

        let kind = if exception_records { "exception-record" } else { "case" };
        let mut match_phrase = Map::new();
        match_phrase.insert(field.to_string(), Value::String(value.to_string()));
        let query = json!({
            "query": { "match_phrase": match_phrase },
            "_source": ["reference"]
        });

        let response = self
            .with_auth_headers(
                self.http
                    .post(format!("{}/searchCases", self.base_url))
                    .query(&[("service", service), ("kind", kind)])
                    .json(&query),
                &creds,
            )
            .send()
            .await
            .map_err(transport)?;

        let response = check_status(response).await?;
        let parsed: SearchResponse = response.json().await.map_err(transport)?;

        debug!(
            service = %service,
            kind = %kind,
            field = %field,
            hits = parsed.cases.len(),
            "Case search completed"
        );

        Ok(parsed.cases.into_iter().map(|hit| hit.id).collect())
    }
}

fn transport(e: reqwest::Error) -> CaseStoreError {
    CaseStoreError::Transport(e.to_string())
}

/// Convert a non-success response into the error taxonomy.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, CaseStoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(CaseStoreError::Api {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl CaseStore for HttpCaseStore {
    async fn get_case(
        &self,
        case_ref: &str,
        jurisdiction: &str,
    ) -> Result<CaseDetails, CaseStoreError> {
        let creds = self.auth.authenticate(jurisdiction).await?;

        let response = self
            .with_auth_headers(
                self.http
                    .get(format!("{}/cases/{case_ref}", self.base_url))
                    .query(&[("jurisdiction", jurisdiction)]),
                &creds,
            )
            .send()
            .await
            .map_err(transport)?;

        match response.status().as_u16() {
            404 => Err(CaseStoreError::CaseNotFound {
                case_ref: case_ref.to_string(),
            }),
            400 => Err(CaseStoreError::InvalidCaseId {
                case_ref: case_ref.to_string(),
            }),
            _ => {
                let response = check_status(response).await?;
                response.json().await.map_err(transport)
            }
        }
    }

    async fn start_event(
        &self,
        creds: &UserCredentials,
        jurisdiction: &str,
        case_type_id: &str,
        case_ref: Option<&str>,
        event_id: &str,
    ) -> Result<StartEventResponse, CaseStoreError> {
        let url = match case_ref {
            Some(case_ref) => format!(
                "{}/caseworkers/{}/jurisdictions/{}/case-types/{}/cases/{}/event-triggers/{}/token",
                self.base_url, creds.user_id, jurisdiction, case_type_id, case_ref, event_id
            ),
            None => format!(
                "{}/caseworkers/{}/jurisdictions/{}/case-types/{}/event-triggers/{}/token",
                self.base_url, creds.user_id, jurisdiction, case_type_id, event_id
            ),
        };

        let response = self
            .with_auth_headers(self.http.get(url), creds)
            .send()
            .await
            .map_err(transport)?;
        let response = check_status(response).await?;
        response.json().await.map_err(transport)
    }

    async fn submit_event(
        &self,
        creds: &UserCredentials,
        jurisdiction: &str,
        case_type_id: &str,
        case_ref: Option<&str>,
        content: &CaseDataContent,
    ) -> Result<CaseDetails, CaseStoreError> {
        let url = match case_ref {
            Some(case_ref) => format!(
                "{}/caseworkers/{}/jurisdictions/{}/case-types/{}/cases/{}/events",
                self.base_url, creds.user_id, jurisdiction, case_type_id, case_ref
            ),
            None => format!(
                "{}/caseworkers/{}/jurisdictions/{}/case-types/{}/cases?ignore-warning=true",
                self.base_url, creds.user_id, jurisdiction, case_type_id
            ),
        };

        let response = self
            .with_auth_headers(self.http.post(url).json(content), creds)
            .send()
            .await
            .map_err(transport)?;
        let response = check_status(response).await?;
        response.json().await.map_err(transport)
    }

    async fn get_case_refs_by_legacy_id(
        &self,
        legacy_id: &str,
        service: &str,
    ) -> Result<Vec<i64>, CaseStoreError> {
        self.search_refs(service, false, LEGACY_REF_FIELD, legacy_id)
            .await
    }

    async fn get_case_refs_by_bulk_scan_reference(
        &self,
        bulk_scan_reference: &str,
        service: &str,
    ) -> Result<Vec<i64>, CaseStoreError> {
        self.search_refs(service, false, BULK_SCAN_REF_FIELD, bulk_scan_reference)
            .await
    }

    async fn get_case_refs_by_envelope_id(
        &self,
        envelope_id: &str,
        service: &str,
    ) -> Result<Vec<i64>, CaseStoreError> {
        self.search_refs(service, false, CASE_ENVELOPE_ID_FIELD, envelope_id)
            .await
    }

    async fn get_exception_record_refs_by_envelope_id(
        &self,
        envelope_id: &str,
        service: &str,
    ) -> Result<Vec<i64>, CaseStoreError> {
        self.search_refs(service, true, EXCEPTION_RECORD_ENVELOPE_ID_FIELD, envelope_id)
            .await
    }
}

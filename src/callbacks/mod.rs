//! Case-management store callback endpoints.

pub mod attach;
pub mod create;

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tower_http::cors::CorsLayer;
use tracing::error;

use crate::cases::ErrorsAndWarnings;
use crate::cases::validation::CallbackCaseDetails;

pub use attach::AttachToCaseCallbackService;
pub use create::CreateCaseCallbackService;

/// Callback request from the store.
#[derive(Debug, Clone, Deserialize)]
pub struct CcdCallbackRequest {
    #[serde(rename = "event_id", alias = "eventId")]
    pub event_id: String,
    #[serde(rename = "case_details", alias = "caseDetails")]
    pub case_details: CallbackCaseDetails,
    #[serde(rename = "ignore_warnings", alias = "ignoreWarnings", default)]
    pub ignore_warnings: bool,
}

/// Callback response: a finalized field map, or errors/warnings.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CcdCallbackResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl CcdCallbackResponse {
    fn with_data(data: Map<String, Value>) -> Self {
        Self {
            data: Some(data),
            ..Default::default()
        }
    }

    fn from_errors(errors_and_warnings: ErrorsAndWarnings) -> Self {
        Self {
            data: None,
            errors: errors_and_warnings.errors,
            warnings: errors_and_warnings.warnings,
        }
    }
}

#[derive(Clone)]
pub struct CallbackState {
    pub attach: Arc<AttachToCaseCallbackService>,
    pub create: Arc<CreateCaseCallbackService>,
}

/// Build the callback router.
pub fn callback_routes(state: CallbackState) -> Router {
    Router::new()
        .route("/callback/attach-to-case", post(attach_to_case))
        .route("/callback/create-new-case", post(create_new_case))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn requester_headers(headers: &HeaderMap) -> (Option<&str>, Option<&str>) {
    let idam_token = headers.get("authorization").and_then(|v| v.to_str().ok());
    let user_id = headers.get("user-id").and_then(|v| v.to_str().ok());
    (idam_token, user_id)
}

async fn attach_to_case(
    State(state): State<CallbackState>,
    headers: HeaderMap,
    Json(request): Json<CcdCallbackRequest>,
) -> Json<CcdCallbackResponse> {
    let (idam_token, user_id) = requester_headers(&headers);

    match state.attach.process(&request, idam_token, user_id).await {
        Ok(Ok(data)) => Json(CcdCallbackResponse::with_data(data)),
        Ok(Err(errors_and_warnings)) => {
            Json(CcdCallbackResponse::from_errors(errors_and_warnings))
        }
        Err(e) => {
            error!(error = %e, "Attach-to-case callback failed unexpectedly");
            Json(CcdCallbackResponse::from_errors(
                ErrorsAndWarnings::with_errors(vec![format!("Internal error: {e}")]),
            ))
        }
    }
}

async fn create_new_case(
    State(state): State<CallbackState>,
    headers: HeaderMap,
    Json(request): Json<CcdCallbackRequest>,
) -> Json<CcdCallbackResponse> {
    let (idam_token, user_id) = requester_headers(&headers);

    match state.create.process(&request, idam_token, user_id).await {
        Ok(Ok(data)) => Json(CcdCallbackResponse::with_data(data)),
        Ok(Err(errors_and_warnings)) => {
            Json(CcdCallbackResponse::from_errors(errors_and_warnings))
        }
        Err(e) => {
            error!(error = %e, "Create-new-case callback failed unexpectedly");
            Json(CcdCallbackResponse::from_errors(
                ErrorsAndWarnings::with_errors(vec![format!("Internal error: {e}")]),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_omits_empty_collections() {
        let response = CcdCallbackResponse::with_data(Map::new());
        let rendered = serde_json::to_value(&response).unwrap();
        assert!(rendered.get("errors").is_none());
        assert!(rendered.get("warnings").is_none());
        assert!(rendered.get("data").is_some());
    }

    #[test]
    fn request_accepts_camel_case() {
        let request: CcdCallbackRequest = serde_json::from_value(json!({
            "eventId": "attachToExistingCase",
            "caseDetails": {"id": 555, "jurisdiction": "BULKSCAN"},
            "ignoreWarnings": true
        }))
        .unwrap();
        assert_eq!(request.event_id, "attachToExistingCase");
        assert!(request.ignore_warnings);
        assert_eq!(request.case_details.id, Some(555));
    }
}

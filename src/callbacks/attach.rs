//! Attach-to-case callback orchestration.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::warn;

use crate::callbacks::CcdCallbackRequest;
use crate::cases::ErrorsAndWarnings;
use crate::cases::attach::{AttachResult, ExceptionRecordAttacher};
use crate::cases::exception_record::{CallbackType, finalize_exception_record};
use crate::cases::validation;
use crate::config::ServiceConfigResolver;
use crate::error::Result;

pub struct AttachToCaseCallbackService {
    resolver: ServiceConfigResolver,
    attacher: Arc<ExceptionRecordAttacher>,
}

impl AttachToCaseCallbackService {
    pub fn new(resolver: ServiceConfigResolver, attacher: Arc<ExceptionRecordAttacher>) -> Self {
        Self { resolver, attacher }
    }

    /// Attach the exception record described by the callback to its target
    /// case. Returns the finalized field map, or structured
    /// errors/warnings for the requester.
    pub async fn process(
        &self,
        request: &CcdCallbackRequest,
        idam_token: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<std::result::Result<Map<String, Value>, ErrorsAndWarnings>> {
        if let Err(error) = validation::attach_prerequisites(
            &request.event_id,
            &request.case_details,
            idam_token,
            user_id,
        ) {
            warn!(error = %error, "Attach callback failed prerequisite check");
            return Ok(Err(ErrorsAndWarnings::with_errors(vec![error])));
        }

        let event = match validation::build_attach_event_data(
            &request.case_details,
            idam_token,
            user_id,
            &self.resolver,
        ) {
            Ok(event) => event,
            Err(errors) => {
                warn!(?errors, "Attach callback failed validation");
                return Ok(Err(ErrorsAndWarnings::with_errors(errors)));
            }
        };

        match self
            .attacher
            .try_attach_to_case(&event, &request.case_details, request.ignore_warnings)
            .await?
        {
            AttachResult::Attached { case_ref } => Ok(Ok(finalize_exception_record(
                &request.case_details.data,
                &case_ref,
                CallbackType::AttachToCase,
            ))),
            AttachResult::Rejected(errors_and_warnings) => Ok(Err(errors_and_warnings)),
        }
    }
}

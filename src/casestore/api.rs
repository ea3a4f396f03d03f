//! The capability interface over the case-management store.

use async_trait::async_trait;

use crate::casestore::auth::UserCredentials;
use crate::casestore::types::{CaseDataContent, CaseDetails, StartEventResponse};
use crate::error::CaseStoreError;

/// Operations the orchestrator needs from the store. The real store is an
/// external HTTP service; tests substitute in-memory fakes.
#[async_trait]
pub trait CaseStore: Send + Sync {
    /// Fetch a case by its store-internal reference.
    ///
    /// A missing case maps to [`CaseStoreError::CaseNotFound`]; a reference
    /// the store rejects as malformed maps to
    /// [`CaseStoreError::InvalidCaseId`].
    async fn get_case(
        &self,
        case_ref: &str,
        jurisdiction: &str,
    ) -> Result<CaseDetails, CaseStoreError>;

    /// Start an event. `case_ref` is `None` when the event creates a case.
    async fn start_event(
        &self,
        creds: &UserCredentials,
        jurisdiction: &str,
        case_type_id: &str,
        case_ref: Option<&str>,
        event_id: &str,
    ) -> Result<StartEventResponse, CaseStoreError>;

    /// Submit a previously started event.
    async fn submit_event(
        &self,
        creds: &UserCredentials,
        jurisdiction: &str,
        case_type_id: &str,
        case_ref: Option<&str>,
        content: &CaseDataContent,
    ) -> Result<CaseDetails, CaseStoreError>;

    /// Search service cases by the legacy (pre-migration) case reference.
    async fn get_case_refs_by_legacy_id(
        &self,
        legacy_id: &str,
        service: &str,
    ) -> Result<Vec<i64>, CaseStoreError>;

    /// Search service cases by their bulk-scan case reference (the id of
    /// the exception record a case was created from).
    async fn get_case_refs_by_bulk_scan_reference(
        &self,
        bulk_scan_reference: &str,
        service: &str,
    ) -> Result<Vec<i64>, CaseStoreError>;

    /// Search service cases by the originating envelope id.
    async fn get_case_refs_by_envelope_id(
        &self,
        envelope_id: &str,
        service: &str,
    ) -> Result<Vec<i64>, CaseStoreError>;

    /// Search exception records by the originating envelope id.
    async fn get_exception_record_refs_by_envelope_id(
        &self,
        envelope_id: &str,
        service: &str,
    ) -> Result<Vec<i64>, CaseStoreError>;
}

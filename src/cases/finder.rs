//! Case resolution: by store-internal id, legacy id, or bulk-scan reference.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::casestore::CaseStore;
use crate::casestore::types::CaseDetails;
use crate::config::ServiceConfig;
use crate::envelope::model::Envelope;
use crate::error::CaseStoreError;

/// Outcome of resolving an envelope to a case. Ambiguity is an explicit
/// variant — the finder never picks among multiple candidates.
#[derive(Debug)]
pub enum FindCaseResult {
    Found(Box<CaseDetails>),
    NotFound,
    MultipleFound(Vec<i64>),
}

pub struct CaseFinder {
    store: Arc<dyn CaseStore>,
}

impl CaseFinder {
    pub fn new(store: Arc<dyn CaseStore>) -> Self {
        Self { store }
    }

    /// Resolve the target case for an envelope.
    ///
    /// Ordered and short-circuiting: a usable store-internal reference is
    /// tried first (not-found and invalid-id are soft misses), then the
    /// legacy reference. Transport failures propagate — they are the
    /// consumer's retry decision, not a resolution result.
    pub async fn find_case(&self, envelope: &Envelope) -> Result<FindCaseResult, CaseStoreError> {
        if let Some(case_ref) = envelope.case_ref.as_deref().filter(|r| is_valid_case_ref(r)) {
            if let Some(case) = self.get_case_by_id(case_ref, &envelope.jurisdiction).await? {
                return Ok(FindCaseResult::Found(Box::new(case)));
            }
        }

        match envelope.legacy_case_ref.as_deref() {
            Some(legacy_ref) if !legacy_ref.is_empty() => {
                self.get_case_by_legacy_id(envelope, legacy_ref).await
            }
            _ => Ok(FindCaseResult::NotFound),
        }
    }

    /// Find service cases already created for an exception record, keyed by
    /// the service's configured search strategy.
    pub async fn find_cases(
        &self,
        exception_record_id: i64,
        envelope_id: &str,
        service_config: &ServiceConfig,
    ) -> Result<Vec<i64>, CaseStoreError> {
        if service_config.search_cases_by_envelope_id {
            info!(
                exception_record = exception_record_id,
                envelope = %envelope_id,
                "Searching for existing service cases by envelope id"
            );
            self.store
                .get_case_refs_by_envelope_id(envelope_id, &service_config.service)
                .await
        } else {
            info!(
                exception_record = exception_record_id,
                "Searching for existing service cases by bulk-scan case reference"
            );
            self.store
                .get_case_refs_by_bulk_scan_reference(
                    &exception_record_id.to_string(),
                    &service_config.service,
                )
                .await
        }
    }

    async fn get_case_by_legacy_id(
        &self,
        envelope: &Envelope,
        legacy_ref: &str,
    ) -> Result<FindCaseResult, CaseStoreError> {
        let case_refs = self
            .store
            .get_case_refs_by_legacy_id(legacy_ref, &envelope.container)
            .await?;

        match case_refs.as_slice() {
            [] => {
                info!(
                    legacy_ref = %legacy_ref,
                    envelope = %envelope.id,
                    "Case not found by legacy id"
                );
                Ok(FindCaseResult::NotFound)
            }
            [case_ref] => {
                match self
                    .get_case_by_id(&case_ref.to_string(), &envelope.jurisdiction)
                    .await?
                {
                    Some(case) => {
                        info!(
                            legacy_ref = %legacy_ref,
                            case = case.id,
                            envelope = %envelope.id,
                            "Found case for legacy id"
                        );
                        Ok(FindCaseResult::Found(Box::new(case)))
                    }
                    None => {
                        // The search index knew the case but the read did
                        // not — a store-side inconsistency, not retryable.
                        error!(
                            legacy_ref = %legacy_ref,
                            case = case_ref,
                            envelope = %envelope.id,
                            "Case was found by legacy id but subsequent read could not find it"
                        );
                        Ok(FindCaseResult::NotFound)
                    }
                }
            }
            many => {
                warn!(
                    legacy_ref = %legacy_ref,
                    envelope = %envelope.id,
                    cases = ?many,
                    "Multiple cases found for legacy id"
                );
                Ok(FindCaseResult::MultipleFound(many.to_vec()))
            }
        }
    }

    /// Fetch by store-internal id; not-found and invalid-id are soft misses.
    async fn get_case_by_id(
        &self,
        case_ref: &str,
        jurisdiction: &str,
    ) -> Result<Option<CaseDetails>, CaseStoreError> {
        match self.store.get_case(case_ref, jurisdiction).await {
            Ok(case) => Ok(Some(case)),
            Err(CaseStoreError::CaseNotFound { .. }) => {
                info!(case_ref = %case_ref, "Case not found by store id");
                Ok(None)
            }
            Err(CaseStoreError::InvalidCaseId { .. }) => {
                warn!(case_ref = %case_ref, "Store rejected case ref as invalid");
                Ok(None)
            }
            Err(other) => Err(other),
        }
    }
}

/// A reference is only worth a direct fetch when it is numeric.
fn is_valid_case_ref(case_ref: &str) -> bool {
    !case_ref.is_empty() && case_ref.bytes().all(|b| b.is_ascii_digit())
}

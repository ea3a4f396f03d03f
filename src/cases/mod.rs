//! Case-resolution and attach/create decision logic.

pub mod attach;
pub mod create;
pub mod documents;
pub mod exception_record;
pub mod finder;
pub mod summary;
pub mod update;
pub mod validation;

use serde::Serialize;

/// Structured errors and warnings returned to a callback requester.
/// Validation failures accumulate here instead of aborting one at a time.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ErrorsAndWarnings {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ErrorsAndWarnings {
    pub fn with_errors(errors: Vec<String>) -> Self {
        Self {
            errors,
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(warnings: Vec<String>) -> Self {
        Self {
            errors: Vec::new(),
            warnings,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }
}

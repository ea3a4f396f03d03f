//! Error types for the orchestrator.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Invalid envelope: {0}")]
    Parse(#[from] ParseError),

    #[error("Case store error: {0}")]
    CaseStore(#[from] CaseStoreError),

    #[error("Attach error: {0}")]
    Attach(#[from] AttachError),

    #[error("Transformation error: {0}")]
    Transformation(#[from] TransformationError),

    #[error("Payments error: {0}")]
    Payments(#[from] PaymentsError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Envelope processing hit a failure that a later redelivery may fix.
    #[error("{0}")]
    Processing(String),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Service {0} is not configured")]
    ServiceNotConfigured(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Envelope parsing errors. A malformed payload can never be fixed by
/// redelivery, so every variant is unrecoverable.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid envelope message: {0}")]
    InvalidMessage(String),

    #[error("Unknown classification: {0}")]
    UnknownClassification(String),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors from the case-management store collaborator.
#[derive(Debug, thiserror::Error)]
pub enum CaseStoreError {
    #[error("Case {case_ref} not found")]
    CaseNotFound { case_ref: String },

    #[error("Invalid case ref: {case_ref}")]
    InvalidCaseId { case_ref: String },

    #[error("Case store responded with status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Case store call failed: {0}")]
    Transport(String),

    #[error("Authentication against {jurisdiction} failed: {reason}")]
    Auth { jurisdiction: String, reason: String },
}

impl CaseStoreError {
    /// Client errors (4xx) cannot be fixed by retrying the same call.
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::CaseNotFound { .. } | Self::InvalidCaseId { .. } => true,
            Self::Api { status, .. } => (400..500).contains(status),
            Self::Transport(_) | Self::Auth { .. } => false,
        }
    }
}

/// Terminal business errors from the attach path. Messages are surfaced
/// verbatim to the callback requester.
#[derive(Debug, thiserror::Error)]
pub enum AttachError {
    #[error("Exception record is already attached to case {case_ref}")]
    AlreadyAttachedToCase { case_ref: String },

    #[error(
        "Documents with following control numbers are already present in the \
         case {case_ref} and cannot be added: {}", .dcns.join(", ")
    )]
    DuplicateDocuments { case_ref: String, dcns: Vec<String> },

    #[error("No case found for legacy case reference {0}")]
    CaseNotFound(String),

    #[error(
        "Multiple cases ({}) found for the given legacy case reference: {reference}",
        .case_ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", ")
    )]
    MultipleCasesFound { reference: String, case_ids: Vec<i64> },

    #[error("Invalid case reference: {0}")]
    InvalidCaseId(String),

    #[error("Payment references cannot be processed. Please try again later")]
    PaymentsPublishingFailure,

    #[error("{0}")]
    CaseStore(#[from] CaseStoreError),
}

/// Errors from the transformation/update collaborators.
#[derive(Debug, thiserror::Error)]
pub enum TransformationError {
    /// The collaborator rejected our request outright (HTTP 400).
    #[error("Transformation request rejected: {0}")]
    CallerError(String),

    /// Structured validation outcome (HTTP 422) — not an exception.
    #[error("Transformation reported {} error(s) and {} warning(s)", .errors.len(), .warnings.len())]
    Invalid {
        errors: Vec<String>,
        warnings: Vec<String>,
    },

    #[error("Transformation responded with status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Transformation call failed: {0}")]
    Transport(String),
}

impl TransformationError {
    /// Whether redelivery could plausibly fix this failure.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::CallerError(_) | Self::Invalid { .. } => false,
            Self::Api { status, .. } => !(400..500).contains(status),
            Self::Transport(_) => true,
        }
    }
}

/// Payments collaborator errors.
#[derive(Debug, thiserror::Error)]
pub enum PaymentsError {
    #[error("Failed to publish payment command: {0}")]
    PublishingFailed(String),
}

/// Queue transport errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Failed to receive message: {0}")]
    Receive(String),

    #[error("Failed to settle message {message_id}: {reason}")]
    Settle { message_id: String, reason: String },
}

/// Result type alias for the orchestrator.
pub type Result<T> = std::result::Result<T, Error>;

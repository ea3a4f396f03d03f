//! Configuration types.
//!
//! Process-level settings come from environment variables with defaults.
//! Per-service settings (one block per onboarded service) are loaded from a
//! TOML file and exposed through the injected [`ServiceConfigResolver`].

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// Process-level configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Path to the local libsql database file.
    pub db_path: String,
    /// Path to the per-service configuration TOML file.
    pub services_config_path: String,
    /// Port for the callback HTTP server.
    pub http_port: u16,
    /// Queue poll interval in seconds.
    pub queue_poll_interval_secs: u64,
    /// Visibility timeout for claimed messages, in seconds. An
    /// unacknowledged message becomes visible again after this long.
    pub queue_visibility_timeout_secs: u64,
    /// Maximum delivery count before a message is dead-lettered.
    pub max_delivery_count: u32,
    /// How many times a failed idempotency-ledger write is retried.
    pub ledger_retry_count: u32,
    /// Age in days after which dead-lettered messages are deleted.
    pub dlq_retention_days: u32,
    /// Base URL of the case-management store.
    pub case_store_base_url: String,
    /// Base URL of the identity provider.
    pub idam_base_url: String,
    /// Base URL of the document store; scanned-document URLs are built
    /// against it.
    pub document_management_url: String,
    /// Base URL of the payments processor.
    pub payments_base_url: Option<String>,
    /// URL the processed-envelope notification is posted to.
    pub processed_envelopes_url: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            db_path: std::env::var("ORCHESTRATOR_DB_PATH")
                .unwrap_or_else(|_| "./data/orchestrator.db".to_string()),
            services_config_path: std::env::var("ORCHESTRATOR_SERVICES_CONFIG")
                .unwrap_or_else(|_| "./config/services.toml".to_string()),
            http_port: env_parse("ORCHESTRATOR_HTTP_PORT", 8080),
            queue_poll_interval_secs: env_parse("ORCHESTRATOR_QUEUE_POLL_INTERVAL_SECS", 2),
            queue_visibility_timeout_secs: env_parse("ORCHESTRATOR_QUEUE_VISIBILITY_SECS", 300),
            max_delivery_count: env_parse("ORCHESTRATOR_MAX_DELIVERY_COUNT", 10),
            ledger_retry_count: env_parse("ORCHESTRATOR_LEDGER_RETRY_COUNT", 3),
            dlq_retention_days: env_parse("ORCHESTRATOR_DLQ_RETENTION_DAYS", 30),
            case_store_base_url: std::env::var("CASE_STORE_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:4452".to_string()),
            idam_base_url: std::env::var("IDAM_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:5000".to_string()),
            document_management_url: std::env::var("DOCUMENT_MANAGEMENT_URL")
                .unwrap_or_else(|_| "http://localhost:4603".to_string()),
            payments_base_url: std::env::var("PAYMENTS_BASE_URL").ok(),
            processed_envelopes_url: std::env::var("PROCESSED_ENVELOPES_URL").ok(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Configuration for a single onboarded service.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name, matching the envelope's container.
    pub service: String,
    /// Jurisdiction the service's cases live in.
    pub jurisdiction: String,
    /// URL of the service's transformation endpoint.
    #[serde(default)]
    pub transformation_url: Option<String>,
    /// URL of the service's case-update endpoint.
    #[serde(default)]
    pub update_url: Option<String>,
    /// Whether new-application envelopes may create cases automatically.
    #[serde(default)]
    pub auto_case_creation_enabled: bool,
    /// Whether OCR envelopes may update cases automatically.
    #[serde(default)]
    pub auto_case_update_enabled: bool,
    /// When set, case searches for an exception record are keyed by the
    /// originating envelope id rather than the bulk-scan case reference.
    #[serde(default)]
    pub search_cases_by_envelope_id: bool,
    /// Whether an exception record may be attached to a case while its
    /// payment DCNs are still being processed.
    #[serde(default)]
    pub allow_attach_to_case_before_payments_are_processed: bool,
}

#[derive(Debug, Deserialize)]
struct ServicesFile {
    #[serde(default)]
    services: Vec<ServiceConfig>,
}

/// Read-only resolver for per-service configuration, keyed by service name
/// (case-insensitive). Injected into the engines; never a global.
#[derive(Debug, Clone)]
pub struct ServiceConfigResolver {
    services: HashMap<String, ServiceConfig>,
}

impl ServiceConfigResolver {
    pub fn new(services: Vec<ServiceConfig>) -> Self {
        let services = services
            .into_iter()
            .map(|s| (s.service.to_lowercase(), s))
            .collect();
        Self { services }
    }

    /// Load the service table from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let parsed: ServicesFile =
            toml::from_str(&raw).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        Ok(Self::new(parsed.services))
    }

    /// Look up the configuration for a service.
    pub fn get(&self, service: &str) -> Result<&ServiceConfig, ConfigError> {
        self.services
            .get(&service.to_lowercase())
            .ok_or_else(|| ConfigError::ServiceNotConfigured(service.to_string()))
    }
}

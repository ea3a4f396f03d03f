use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use secrecy::SecretString;

use scan_orchestrator::callbacks::{
    AttachToCaseCallbackService, CallbackState, CreateCaseCallbackService, callback_routes,
};
use scan_orchestrator::cases::attach::ExceptionRecordAttacher;
use scan_orchestrator::cases::create::{AutoCaseCreator, NewCaseCreator};
use scan_orchestrator::cases::exception_record::ExceptionRecordCreator;
use scan_orchestrator::cases::finder::CaseFinder;
use scan_orchestrator::cases::update::CaseUpdater;
use scan_orchestrator::casestore::auth::{CachedIdamClient, jurisdiction_users_from_env};
use scan_orchestrator::casestore::http::HttpCaseStore;
use scan_orchestrator::clients::payments::{
    HttpPaymentsPublisher, NoopPaymentsPublisher, PaymentsPublisher, PaymentsService,
};
use scan_orchestrator::clients::processed_envelopes::{
    HttpProcessedEnvelopeNotifier, NoopProcessedEnvelopeNotifier, ProcessedEnvelopeNotifier,
};
use scan_orchestrator::clients::transformation::HttpTransformationClient;
use scan_orchestrator::config::{AppConfig, ServiceConfigResolver};
use scan_orchestrator::ledger::LedgerProxy;
use scan_orchestrator::queue::consumer::{QueueConsumer, spawn_consumer};
use scan_orchestrator::queue::dlq::spawn_dlq_cleanup;
use scan_orchestrator::queue::store_source::DurableQueueSource;
use scan_orchestrator::router::EnvelopeRouter;
use scan_orchestrator::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env();

    eprintln!("📬 Scan Orchestrator v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Callbacks: http://0.0.0.0:{}/callback", config.http_port);
    eprintln!("   Case store: {}", config.case_store_base_url);
    eprintln!("   Database: {}", config.db_path);

    // ── Service configuration ────────────────────────────────────────
    let resolver = ServiceConfigResolver::from_file(&config.services_config_path)
        .unwrap_or_else(|e| {
            eprintln!(
                "Error: Failed to load service config from {}: {}",
                config.services_config_path, e
            );
            std::process::exit(1);
        });

    // ── Database ─────────────────────────────────────────────────────
    let db_path = std::path::Path::new(&config.db_path);
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(db_path).await.unwrap_or_else(|e| {
            eprintln!("Error: Failed to open database at {}: {}", config.db_path, e);
            std::process::exit(1);
        }),
    );

    // ── Collaborator clients ─────────────────────────────────────────
    let http = reqwest::Client::new();

    let auth = Arc::new(CachedIdamClient::new(
        http.clone(),
        config.idam_base_url.clone(),
        jurisdiction_users_from_env(),
    ));

    let service_token = std::env::var("S2S_TOKEN").ok().map(SecretString::from);
    let store = Arc::new(HttpCaseStore::new(
        http.clone(),
        config.case_store_base_url.clone(),
        auth.clone(),
        service_token,
    ));

    let transformation = Arc::new(HttpTransformationClient::new(http.clone()));

    let payments_publisher: Arc<dyn PaymentsPublisher> = match &config.payments_base_url {
        Some(url) => {
            eprintln!("   Payments: enabled ({url})");
            Arc::new(HttpPaymentsPublisher::new(http.clone(), url.clone()))
        }
        None => {
            eprintln!("   Payments: disabled");
            Arc::new(NoopPaymentsPublisher)
        }
    };
    let payments = Arc::new(PaymentsService::new(payments_publisher));

    let notifier: Arc<dyn ProcessedEnvelopeNotifier> = match &config.processed_envelopes_url {
        Some(url) => {
            eprintln!("   Processed-envelope notifications: enabled ({url})");
            Arc::new(HttpProcessedEnvelopeNotifier::new(http.clone(), url.clone()))
        }
        None => {
            eprintln!("   Processed-envelope notifications: disabled");
            Arc::new(NoopProcessedEnvelopeNotifier)
        }
    };

    // ── Engines ──────────────────────────────────────────────────────
    let ledger = Arc::new(LedgerProxy::new(Arc::clone(&db), config.ledger_retry_count));
    let updater = Arc::new(CaseUpdater::new(
        store.clone(),
        auth.clone(),
        transformation.clone(),
        config.document_management_url.clone(),
    ));

    let envelope_router = Arc::new(EnvelopeRouter::new(
        store.clone(),
        auth.clone(),
        CaseFinder::new(store.clone()),
        AutoCaseCreator::new(
            store.clone(),
            auth.clone(),
            transformation.clone(),
            resolver.clone(),
        ),
        updater.clone(),
        ExceptionRecordCreator::new(
            store.clone(),
            auth.clone(),
            config.document_management_url.clone(),
        ),
        payments.clone(),
        resolver.clone(),
        config.document_management_url.clone(),
    ));

    let attacher = Arc::new(ExceptionRecordAttacher::new(
        store.clone(),
        resolver.clone(),
        updater,
        payments.clone(),
        ledger.clone(),
    ));

    // ── Queue consumer ───────────────────────────────────────────────
    let source = Arc::new(DurableQueueSource::new(
        Arc::clone(&db),
        config.queue_visibility_timeout_secs,
    ));
    let consumer = Arc::new(QueueConsumer::new(
        source,
        envelope_router,
        notifier,
        config.max_delivery_count,
    ));
    let (_consumer_handle, _consumer_shutdown) = spawn_consumer(
        consumer,
        Duration::from_secs(config.queue_poll_interval_secs),
    );

    // Dead-letter cleanup sweep (daily)
    let (_dlq_handle, _dlq_shutdown) = spawn_dlq_cleanup(
        Arc::clone(&db),
        config.dlq_retention_days,
        Duration::from_secs(24 * 3600),
    );

    // ── Callback + intake HTTP server ────────────────────────────────
    let callbacks = callback_routes(CallbackState {
        attach: Arc::new(AttachToCaseCallbackService::new(
            resolver.clone(),
            attacher,
        )),
        create: Arc::new(CreateCaseCallbackService::new(
            resolver.clone(),
            CaseFinder::new(store.clone()),
            NewCaseCreator::new(store.clone(), transformation),
            payments,
            ledger,
        )),
    });
    let app = callbacks.merge(
        Router::new()
            .route("/envelopes", post(enqueue_envelope))
            .with_state(Arc::clone(&db)),
    );

    let listener =
        tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.http_port)).await?;
    tracing::info!(port = config.http_port, "Callback server started");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Envelope intake: enqueue a raw envelope message for the consumer.
async fn enqueue_envelope(
    State(db): State<Arc<dyn Database>>,
    body: axum::body::Bytes,
) -> (StatusCode, String) {
    match db.enqueue_message(None, &body).await {
        Ok(id) => (StatusCode::ACCEPTED, id),
        Err(e) => {
            tracing::error!(error = %e, "Failed to enqueue envelope");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

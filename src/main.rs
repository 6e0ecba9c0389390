//! Lifeline Sync server.

use std::error::Error;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tower_http::timeout::TimeoutLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lifeline_sync::adapters::http::{api_router, AppState};
use lifeline_sync::adapters::memory::{
    InMemoryAuditLog, InMemoryDeduplicator, InMemorySubscriptionStore,
};
use lifeline_sync::adapters::postgres::{PostgresAuditSink, PostgresSubscriptionStore};
use lifeline_sync::adapters::redis::RedisDeduplicator;
use lifeline_sync::adapters::websocket::{websocket_router, SubjectChannels, WebSocketState};
use lifeline_sync::application::{
    AuditDispatcher, EmergencyOverrideController, ExpirySweeper, ExpirySweeperConfig,
    PerformanceGovernor, SafetyAccessIndex, StateProjector, WebhookPipeline,
};
use lifeline_sync::config::{AppConfig, StorageBackend, StorageConfig, WebhookConfig};
use lifeline_sync::domain::webhook::{EventRouter, SignatureValidator, UrgencyClassifier};
use lifeline_sync::ports::{AuditSink, Deduplicator, SubscriptionStore};

type BoxError = Box<dyn Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = AppConfig::load()?;
    init_tracing(&config);
    config.validate()?;

    let (store, audit_sink) = build_storage(&config.storage).await?;
    let dedup = build_deduplicator(&config.storage, &config.webhook).await?;
    let processing = &config.processing;

    let channels = Arc::new(SubjectChannels::new(processing.subscriber_channel_capacity));
    let index = Arc::new(SafetyAccessIndex::new(Arc::clone(&store)));
    let (audit, dispatcher) = AuditDispatcher::channel(audit_sink, processing.audit_queue_capacity);

    let projector = Arc::new(
        StateProjector::new(
            Arc::clone(&store),
            channels.clone(),
            index,
            audit.clone(),
            processing.transition_rules(),
        )
        .with_max_attempts(processing.max_projection_attempts),
    );
    let overrides = Arc::new(EmergencyOverrideController::new(Arc::clone(&projector)));
    let governor = PerformanceGovernor::new(Arc::clone(&overrides), audit)
        .with_reserve_ms(processing.forced_completion_reserve_ms);
    let pipeline = Arc::new(WebhookPipeline::new(
        SignatureValidator::new(
            config.webhook.signing_secret.clone(),
            config.webhook.replay_windows(),
        ),
        UrgencyClassifier::new(processing.latency_budgets()),
        Arc::new(EventRouter::with_default_handlers()),
        Arc::clone(&dedup),
        Arc::clone(&projector),
        governor,
    ));
    let sweeper = Arc::new(ExpirySweeper::with_config(
        Arc::clone(&store),
        dedup,
        Arc::clone(&projector),
        ExpirySweeperConfig::default().with_interval(processing.sweep_interval()),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher_task = tokio::spawn(dispatcher.run(shutdown_rx.clone()));
    let sweeper_task = {
        let sweeper = Arc::clone(&sweeper);
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { sweeper.run(shutdown).await })
    };

    let app = api_router(AppState::new(pipeline, overrides, projector))
        .layer(TimeoutLayer::new(config.server.request_timeout()))
        .merge(websocket_router().with_state(WebSocketState::new(channels, store)));

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        %addr,
        environment = ?config.server.environment,
        backend = ?config.storage.backend,
        "Lifeline sync listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down background workers");
    let _ = shutdown_tx.send(true);
    if let Err(e) = dispatcher_task.await {
        tracing::error!(error = %e, "Audit dispatcher task failed");
    }
    if let Err(e) = sweeper_task.await {
        tracing::error!(error = %e, "Expiry sweeper task failed");
    }

    Ok(())
}

/// JSON logs in production, human-readable output otherwise.
/// `RUST_LOG` takes precedence over the configured filter.
fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level));

    if config.is_production() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}

async fn build_storage(
    storage: &StorageConfig,
) -> Result<(Arc<dyn SubscriptionStore>, Arc<dyn AuditSink>), BoxError> {
    match storage.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; state is lost on restart");
            Ok((
                Arc::new(InMemorySubscriptionStore::new()),
                Arc::new(InMemoryAuditLog::default()),
            ))
        }
        StorageBackend::Postgres => {
            let url = storage
                .database_url
                .as_deref()
                .ok_or("postgres backend requires storage.database_url")?;
            let pool = PgPoolOptions::new()
                .max_connections(storage.max_connections)
                .acquire_timeout(storage.acquire_timeout())
                .connect(url)
                .await?;
            sqlx::migrate!("./migrations").run(&pool).await?;
            tracing::info!("Connected to PostgreSQL and applied migrations");

            Ok((
                Arc::new(PostgresSubscriptionStore::new(pool.clone())),
                Arc::new(PostgresAuditSink::new(pool)),
            ))
        }
    }
}

async fn build_deduplicator(
    storage: &StorageConfig,
    webhook: &WebhookConfig,
) -> Result<Arc<dyn Deduplicator>, BoxError> {
    let retention = webhook.dedup_retention();
    match &storage.redis_url {
        Some(url) => {
            let client = redis::Client::open(url.as_str())?;
            let conn = client.get_multiplexed_tokio_connection().await?;
            tracing::info!("Using Redis deduplicator");
            let retention_secs = u64::try_from(retention.num_seconds()).unwrap_or(1);
            Ok(Arc::new(RedisDeduplicator::new(conn, retention_secs)))
        }
        None => Ok(Arc::new(InMemoryDeduplicator::new(retention))),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

//! Notify API server binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use notify_common::config::AppConfig;
use notify_common::db::create_pool;
use notify_common::redis_pool::create_redis_pool;
use notify_notifier::{AdapterRegistry, DispatchConfig, Dispatcher, TracingEventSink};
use notify_queue::{JobQueue, MemoryQueue, PgQueue};

use notify_api::idempotency::IdempotencyGuard;
use notify_api::routes::create_router;
use notify_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(
                "notify_api=info,notify_notifier=info,notify_queue=info,notify=info,tower_http=info",
            )
        }))
        .json()
        .init();

    tracing::info!("Starting Notify API server...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Select the queue backend
    let queue: Arc<dyn JobQueue> = match &config.database_url {
        Some(url) => {
            let pool = create_pool(url, config.db_max_connections).await?;
            sqlx::migrate!("../../migrations").run(&pool).await?;
            tracing::info!("Database migrations applied");
            Arc::new(PgQueue::new(pool, config.lease_timeout()))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, jobs are kept in memory and lost on restart");
            Arc::new(MemoryQueue::new(config.lease_timeout()))
        }
    };

    // Idempotency keys need Redis
    let idempotency = match &config.redis_url {
        Some(url) => {
            let redis = create_redis_pool(url).await?;
            Some(IdempotencyGuard::new(redis, config.idempotency_ttl_secs))
        }
        None => {
            tracing::warn!("REDIS_URL not set, Idempotency-Key headers are ignored");
            None
        }
    };

    // Start the dispatcher
    let client = reqwest::Client::builder()
        .user_agent(concat!("notify/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let adapters = AdapterRegistry::from_config(&config, client);
    let dispatcher = Arc::new(Dispatcher::new(
        queue.clone(),
        adapters,
        Arc::new(TracingEventSink),
        DispatchConfig::from(&config),
    ));
    let handle = dispatcher.spawn();

    // Build application state
    let port = config.port;
    let state = AppState::new(queue, handle.clone(), idempotency);

    // Build router
    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Received shutdown signal");
        })
        .await?;

    // Let in-flight deliveries settle before exiting
    handle.shutdown().await;
    tracing::info!("Notify API server stopped");

    Ok(())
}

//! Boxoffice HTTP server.
//!
//! Seat reservations with short holds, distributed seat locks, a
//! transactional outbox and broker-driven expiration.

use boxoffice_amqp::AmqpGateway;
use boxoffice_core::bus::MessageBus;
use boxoffice_core::environment::{Clock, SystemClock};
use boxoffice_postgres::PostgresBookingStore;
use boxoffice_redis::RedisLockStore;
use boxoffice_runtime::metrics::MetricsRecorder;
use boxoffice_runtime::{
    ExpirationHandler, LockManager, MessageConsumer, OutboxPublisher, ReservationEngine,
};
use boxoffice_server::{AppState, Config, build_router};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "boxoffice=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting boxoffice server");

    let config = Config::from_env();
    info!(
        redis_url = %config.redis.url,
        exchange = %config.amqp.exchange,
        hold_ms = config.booking.hold_ms,
        event_delivery = %config.booking.event_delivery,
        "Configuration loaded"
    );

    let mut recorder = MetricsRecorder::new();
    recorder.install()?;
    let metrics = Arc::new(recorder);

    // System of record
    info!("Connecting to PostgreSQL...");
    let store = Arc::new(PostgresBookingStore::connect(&config.database.url, &config.pool_config()).await?);
    store.migrate().await?;
    info!("PostgreSQL connected");

    // Seat locks
    info!("Connecting to Redis...");
    let locks = LockManager::new(Arc::new(RedisLockStore::connect(&config.redis.url).await?));

    // Broker; connects lazily, so an unreachable broker only delays delivery
    let gateway = Arc::new(AmqpGateway::new(config.gateway_config()));
    if let Err(e) = gateway.connect().await {
        warn!(error = %e, "AMQP broker unreachable at startup, will retry on first use");
    }
    let bus: Arc<dyn MessageBus> = gateway.clone();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let engine = Arc::new(ReservationEngine::new(
        store.clone(),
        locks,
        bus.clone(),
        clock.clone(),
        config.engine_config(),
    ));

    let publisher = Arc::new(OutboxPublisher::new(
        store.clone(),
        bus.clone(),
        clock,
        config.outbox_config(),
    ));

    // Background tasks
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let publisher_handle = publisher.clone().spawn(shutdown_tx.subscribe());
    let consumer_handle = MessageConsumer::new(
        "expiration",
        config.amqp.process_queue.clone(),
        bus,
        Arc::new(ExpirationHandler::new(engine.clone())),
        shutdown_tx.subscribe(),
    )
    .spawn();
    info!("Outbox publisher and expiration consumer started");

    let state = AppState::new(engine, publisher, metrics, config.server.admin_api_key.clone());
    let app = build_router(state);

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, stopping background tasks");
    if shutdown_tx.send(()).is_err() {
        warn!("No background task was listening for shutdown");
    }

    let timeout = Duration::from_secs(config.server.shutdown_timeout);
    let drained = tokio::time::timeout(timeout, async {
        let _ = publisher_handle.await;
        let _ = consumer_handle.await;
    })
    .await;
    if drained.is_err() {
        warn!(timeout_secs = config.server.shutdown_timeout, "Background tasks did not stop in time");
    }

    gateway.close().await;
    store.pool().close().await;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}

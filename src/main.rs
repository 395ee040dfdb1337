use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use poultry_order_core::config::AppConfig;
use poultry_order_core::domain::order::OrderCommandHandler;
use poultry_order_core::domain::settlement::SettlementEngine;
use poultry_order_core::http;
use poultry_order_core::metrics::CoreMetrics;
use poultry_order_core::notifications::{LogNotifier, NotificationDispatcher};
use poultry_order_core::store::PgStore;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Default to INFO level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,poultry_order_core=debug")),
        )
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!(
        port = config.http_port,
        commission_rate = %config.commission_rate,
        tx_timeout_ms = config.tx_timeout.as_millis() as u64,
        "Starting poultry order core"
    );

    // === 1. Database ===
    tracing::info!("Connecting to Postgres...");
    let store = PgStore::connect(&config.database_url, config.db_max_connections).await?;
    sqlx::migrate!("./migrations").run(store.pool()).await?;
    tracing::info!("Migrations applied");

    // === 2. Metrics and notifications ===
    let metrics = Arc::new(CoreMetrics::new()?);
    let notifications = NotificationDispatcher::new(
        Arc::new(LogNotifier),
        config.notifier_breaker.clone(),
        metrics.clone(),
    );

    // === 3. Command handler ===
    let handler = web::Data::new(OrderCommandHandler::new(
        Arc::new(store),
        SettlementEngine::new(config.commission_rate),
        notifications,
        metrics,
        config.tx_timeout,
    ));

    // === 4. HTTP ===
    tracing::info!("Listening on http://0.0.0.0:{}", config.http_port);
    HttpServer::new(move || App::new().app_data(handler.clone()).configure(http::configure))
        .bind(("0.0.0.0", config.http_port))?
        .run()
        .await?;

    tracing::info!("Shut down cleanly");
    Ok(())
}

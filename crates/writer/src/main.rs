//! Standalone writer process.
//!
//! Owns the broker connection, topology and watchdog for the lifetime of the
//! process. Mutations arrive through the request layer, which links
//! `storyfeed_writer` and calls `WriterState::service`; this binary only holds
//! the state until shutdown.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storyfeed_events::broker::redact_url;
use storyfeed_events::{bootstrap_topology, BrokerClient};
use storyfeed_writer::{LogFormat, WriterConfig, WriterState};

const DEFAULT_LOG_FILTER: &str = "storyfeed_writer=debug,storyfeed_events=debug,storyfeed_db=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = WriterConfig::from_env().context("Invalid configuration")?;

    // --- Tracing ---
    init_tracing(config.log_format);
    tracing::info!(
        amqp_url = %redact_url(&config.amqp_url),
        db_max_connections = config.db_max_connections,
        "Loaded writer configuration",
    );

    // --- Database ---
    let pool = storyfeed_db::create_pool(&config.database_url, config.db_max_connections)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    storyfeed_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    tracing::info!("Database health check passed");

    storyfeed_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    // --- Broker ---
    let broker = Arc::new(BrokerClient::amqp(config.amqp_url.clone(), config.reconnect()));
    if let Err(e) = broker.connect().await {
        tracing::warn!(error = %e, "Initial broker connect failed, retrying with backoff");
        tokio::select! {
            result = broker.reconnect() => result.context("Failed to connect to broker")?,
            () = shutdown_signal() => {
                broker.teardown().await.ok();
                return Ok(());
            }
        }
    }

    // --- Topology ---
    let report = bootstrap_topology(&broker).await;
    if report.is_complete() {
        tracing::info!(queues = report.declared.len(), "Broker topology declared");
    } else {
        tracing::warn!(
            declared = report.declared.len(),
            failed = report.failed.len(),
            "Broker topology incomplete",
        );
    }

    // --- Write path ---
    let state = WriterState::new(pool, config, broker);
    tracing::info!("Entity write path ready");

    // --- Broker watchdog ---
    let watchdog_cancel = CancellationToken::new();
    let watchdog = state.watchdog();
    let watchdog_handle = {
        let cancel = watchdog_cancel.clone();
        tokio::spawn(async move { watchdog.run(cancel).await })
    };

    shutdown_signal().await;

    // --- Shutdown ---
    watchdog_cancel.cancel();
    if tokio::time::timeout(state.config.shutdown_timeout, watchdog_handle)
        .await
        .is_err()
    {
        tracing::warn!("Broker watchdog did not stop in time");
    }
    tracing::info!("Broker watchdog stopped");

    if let Err(e) = state.broker.teardown().await {
        tracing::warn!(error = %e, "Broker teardown failed");
    }

    state.pool.close().await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Wait for SIGINT (Ctrl-C) or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

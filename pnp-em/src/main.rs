//! Event Materializer (pnp-em) - Main entry point
//!
//! Wires the pipeline together: decryption key and configuration, the
//! SQLite-backed storage gateway, the catalog client, the notification
//! drain, and the worker pool. The bus consumer feeds the inbound channel;
//! on SIGINT/SIGTERM the workers finish their in-flight messages within a
//! grace period before the process exits.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pnp_common::db::init_db_pool;
use pnp_common::events::notification_channel;
use pnp_em::catalog::HttpCatalog;
use pnp_em::config::{Args, Config};
use pnp_em::db::StorageGateway;
use pnp_em::decoder::MessageDecoder;
use pnp_em::notify::run_notification_drain;
use pnp_em::worker::{spawn_workers, PipelineServices};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pnp_em=debug,pnp_common=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_args(Args::parse()).context("Failed to resolve configuration")?;

    info!(
        workers = config.workers,
        db_path = %config.db_path.display(),
        catalog_url = %config.catalog_url,
        bypass_local_storage = config.bypass_local_storage,
        "Starting PnP event materializer"
    );

    let pool = init_db_pool(&config.db_path)
        .await
        .context("Failed to initialize database")?;

    let decoder = MessageDecoder::from_base64_key(&config.decryption_key)
        .context("Failed to load decryption key")?;

    let catalog = Arc::new(HttpCatalog::new(
        config.catalog_url.clone(),
        config.catalog_refresh,
    ));

    let (notification_tx, notification_rx) = notification_channel(config.notification_capacity);
    let drain = tokio::spawn(run_notification_drain(notification_rx));

    let (inbound_tx, inbound_rx) = mpsc::channel::<Vec<u8>>(config.inbound_capacity);
    let inbound = Arc::new(Mutex::new(inbound_rx));

    let services = Arc::new(PipelineServices {
        decoder,
        catalog,
        gateway: StorageGateway::new(
            pool,
            config.db_deadline,
            config.bypass_local_storage,
        ),
        notifications: notification_tx,
        allowed_cnames: config.allowed_cnames.clone(),
        retry_backoff: config.retry_backoff,
    });

    let shutdown = CancellationToken::new();
    let workers = spawn_workers(config.workers, services, inbound, shutdown.clone());

    // The bus transport lives outside this service. The binary accepts
    // newline-delimited base64 payloads on stdin as the transport seam; a
    // deployment-specific consumer owns the sender half instead.
    let feeder = tokio::spawn(feed_from_stdin(inbound_tx, shutdown.clone()));

    shutdown_signal().await;
    info!("Shutdown signal received, draining in-flight messages");
    shutdown.cancel();

    let drain_all = async {
        for worker in workers {
            if let Err(e) = worker.await {
                warn!("Worker task failed during shutdown: {e}");
            }
        }
    };
    if tokio::time::timeout(config.shutdown_grace, drain_all)
        .await
        .is_err()
    {
        warn!(
            grace_secs = config.shutdown_grace.as_secs(),
            "Grace period elapsed with workers still running"
        );
    }

    feeder.abort();
    drain.abort();
    info!("Event materializer shutdown complete");
    Ok(())
}

/// Read newline-delimited base64 payloads from stdin into the inbound
/// channel. Blank lines and undecodable lines are skipped with a warning.
async fn feed_from_stdin(
    inbound: mpsc::Sender<Vec<u8>>,
    shutdown: CancellationToken,
) {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use tokio::io::{AsyncBufReadExt, BufReader};

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match STANDARD.decode(trimmed) {
                    Ok(payload) => {
                        if inbound.send(payload).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Skipping undecodable stdin line: {e}"),
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read stdin: {e}");
                break;
            }
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}

//! Lavanderia backend
//!
//! Serves the order and machine REST API and runs the machine assignment
//! scheduler in the background.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use lavanderia_backend::{
    api,
    config::{self, StoreKind},
    db::Database,
    scheduler,
    state::AppState,
    store::{MemoryStore, RecordStore, ResourceStore},
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    // Prefer RUST_LOG, fall back to LAUNDRY_LOG_LEVEL
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting lavanderia backend");
    info!(listen_addr = %config.listen_addr, store = ?config.store, "Configuration loaded");

    let (resources, records): (Arc<dyn ResourceStore>, Arc<dyn RecordStore>) = match config.store
    {
        StoreKind::Postgres => {
            let db = match Database::connect(&config.database).await {
                Ok(db) => db,
                Err(e) => {
                    error!(error = %e, "Failed to connect to database");
                    return Err(e.into());
                }
            };

            if config.dev_mode {
                info!("Running database migrations (dev mode)");
                if let Err(e) = db.run_migrations().await {
                    error!(error = %e, "Failed to run migrations");
                    return Err(e.into());
                }
            }

            let store = Arc::new(db.store());
            (
                store.clone() as Arc<dyn ResourceStore>,
                store as Arc<dyn RecordStore>,
            )
        }
        StoreKind::Memory => {
            warn!("Using in-memory store; records are lost on exit");
            let store = Arc::new(MemoryStore::new());
            (
                store.clone() as Arc<dyn ResourceStore>,
                store as Arc<dyn RecordStore>,
            )
        }
    };

    let scheduler = match scheduler::start(resources, config.scheduler.clone()).await {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "Failed to start scheduler");
            return Err(e.into());
        }
    };

    let state = AppState::new(records, scheduler.clone());
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);

    info!("Waiting for scheduler to shut down...");
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, scheduler.shutdown())
        .await
        .is_err()
    {
        warn!("Scheduler worker did not shut down in time");
    }

    let tracker = scheduler.tracker();
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, tracker.wait())
        .await
        .is_err()
    {
        warn!(
            releases_in_flight = tracker.in_flight(),
            "Pending releases will be recovered on next start"
        );
    }

    info!("Backend shutdown complete");
    Ok(())
}

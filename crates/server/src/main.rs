//! ada-rs entry point.

mod scheduler;

use std::sync::Arc;

use ada_common::Config;
use ada_core::{
    CoordinatorConfig, DbRetryLedger, PageRegistryStore, RetryPolicy, RunCoordinator,
};
use ada_db::repositories::{
    CheckpointRepository, EvidenceReportRepository, PropagationFailureRepository,
};
use ada_reddit::RedditGateway;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::scheduler::{SchedulerConfig, run_scheduler};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
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
            info!("Received SIGINT, finishing the current community and stopping");
        },
        () = terminate => {
            info!("Received SIGTERM, finishing the current community and stopping");
        },
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "ada=info".into());
    let json = std::env::var("ADA_LOG_JSON").is_ok_and(|v| v != "0" && !v.is_empty());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    info!("Starting ada-rs...");

    // Load configuration
    let config = Config::load()?;
    let coordinator_config = CoordinatorConfig::try_from(&config)?;

    // Connect to database
    let db = ada_db::init(&config).await?;
    info!("Connected to database");

    info!("Running database migrations...");
    ada_db::migrate(&db).await?;
    info!("Migrations completed");

    let db = Arc::new(db);
    let checkpoints = Arc::new(CheckpointRepository::new(Arc::clone(&db)));
    let ledger = Arc::new(DbRetryLedger::new(
        PropagationFailureRepository::new(Arc::clone(&db)),
        RetryPolicy::new(config.worker.max_attempts),
    ));
    let evidence = Arc::new(EvidenceReportRepository::new(Arc::clone(&db)));

    // Platform
    let gateway = Arc::new(RedditGateway::new(&config.reddit)?);
    let registry = Arc::new(PageRegistryStore::new(
        gateway.clone(),
        coordinator_config.main_list.clone(),
        config.bot.registry_page.clone(),
    ));
    info!(
        community = %coordinator_config.main_list,
        page = %config.bot.registry_page,
        keyword = %coordinator_config.keyword,
        "Registry configured"
    );

    let coordinator = Arc::new(RunCoordinator::new(
        coordinator_config,
        gateway,
        registry,
        checkpoints,
        ledger,
        evidence,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let cycles = run_scheduler(
        SchedulerConfig::from(&config.scheduler),
        coordinator,
        shutdown_rx,
    )
    .await?;

    info!(cycles, "ada-rs stopped");
    Ok(())
}

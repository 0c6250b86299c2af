use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use roomledger::config::Config;
use roomledger::notify::OutcomeHub;
use roomledger::{compactor, BookingCoordinator, Ledger};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    roomledger::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let ledger = Arc::new(Ledger::open(config.wal_path(), config.ledger_options())?);
    let coordinator = BookingCoordinator::new(ledger.clone(), Arc::new(OutcomeHub::new()));
    if config.seed_defaults {
        let created = coordinator.seed_default_rooms().await?;
        if created > 0 {
            info!("seeded {created} default rooms");
        }
    }

    info!("roomledger ready");
    info!("  wal: {}", ledger.path().display());
    info!("  resources: {}", ledger.resource_count());
    info!("  compact threshold: {} appends", config.compact_threshold);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let compactor = tokio::spawn(compactor::run_compactor(
        ledger.clone(),
        config.compact_threshold,
        config.compact_interval,
    ));

    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }

    info!("shutdown signal received");
    compactor.abort();
    match ledger.compact().await {
        Ok(()) => info!("final compaction done"),
        Err(e) => tracing::warn!("final compaction failed: {e}"),
    }

    info!("roomledger stopped");
    Ok(())
}

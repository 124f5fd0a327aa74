use std::sync::Arc;

use tracing::info;

use slotbook::config::Config;
use slotbook::engine::Engine;
use slotbook::reaper;
use slotbook::store::WalStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    slotbook::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let wal_path = config.wal_path();
    let store = WalStore::open(&wal_path)?;
    let engine = Arc::new(Engine::new(store));

    info!("slotbook started");
    info!("  wal: {}", wal_path.display());
    info!("  reconcile_interval: {:?}", config.reconcile_interval);
    info!("  compact_threshold: {}", config.compact_threshold);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    // First pass right away: repairs claims left pending by a crash.
    let reconciler = tokio::spawn(reaper::run_reconciler(engine.clone(), config.reconcile_interval));
    let compactor = tokio::spawn(reaper::run_compactor(engine.clone(), config.compact_threshold));

    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }

    info!("shutdown signal received, stopping background tasks");
    reconciler.abort();
    compactor.abort();

    if let Err(e) = engine.store().compact().await {
        tracing::warn!("final compaction failed: {e}");
    }
    info!("slotbook stopped");
    Ok(())
}

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use parkd::clock::Clock;
use parkd::config::{Config, LockProvider};
use parkd::engine::Engine;
use parkd::lock::RedisLock;
use parkd::notify::{LotOccupancy, NotifyHub};
use parkd::scheduler;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    parkd::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let notify = Arc::new(NotifyHub::new());
    let mut engine = Engine::new(
        config.wal_path(),
        config.engine_settings()?,
        Clock::System,
        notify.clone(),
    )?;
    if config.lock_provider == LockProvider::Redis
        && let Some(url) = &config.redis_url
    {
        engine = engine.with_lock_backend(Arc::new(RedisLock::connect(url).await?));
    }
    let engine = Arc::new(engine);

    info!("parkd started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  lock backend: {}", engine.lock_backend());
    info!("  sweep interval: {}s", config.sweep_interval_secs);
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let (stop, stopped) = watch::channel(false);
    let occupancy = Arc::new(LotOccupancy::new());
    let consumer = tokio::spawn(occupancy.run(notify.subscribe_all()));
    let sweeper = tokio::spawn(scheduler::run_sweeper(
        engine.clone(),
        config.sweep_interval(),
        config.compact_threshold,
        stopped.clone(),
    ));
    let reset = tokio::spawn(scheduler::run_daily_reset(engine.clone(), stopped));

    // Graceful shutdown on SIGTERM/ctrl-c
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    info!("shutdown signal received, stopping background tasks");
    let _ = stop.send(true);
    let _ = sweeper.await;
    let _ = reset.await;
    consumer.abort();

    match engine.compact_wal().await {
        Ok(true) => info!("WAL compacted on shutdown"),
        Ok(false) => tracing::warn!("WAL busy at shutdown, left uncompacted"),
        Err(e) => tracing::error!("WAL compaction on shutdown failed: {e}"),
    }

    info!("parkd stopped");
    Ok(())
}

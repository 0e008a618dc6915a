use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::engine::Engine;

/// Background task: overstay and no-show sweeps on a fixed interval, plus
/// lock-table cleanup and WAL compaction once enough appends piled up.
///
/// Shutdown is only observed between passes, so a booking is never left
/// closed but unsettled.
pub async fn run_sweeper(
    engine: Arc<Engine>,
    interval: Duration,
    compact_threshold: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => break,
        }
        sweep_once(&engine, compact_threshold).await;
    }
    debug!("sweeper stopped");
}

pub async fn sweep_once(engine: &Engine, compact_threshold: u64) {
    engine.run_sweeps().await;

    let purged = engine.purge_expired_locks();
    if purged > 0 {
        debug!("purged {purged} expired lock records");
    }

    if engine.wal_appends_since_compact().await >= compact_threshold {
        match engine.compact_wal().await {
            Ok(true) => {}
            Ok(false) => debug!("compaction skipped, engine busy"),
            Err(e) => error!("WAL compaction failed: {e}"),
        }
    }
}

/// Background task: restore every spot to full capacity at the nightly cutoff.
pub async fn run_daily_reset(engine: Arc<Engine>, mut shutdown: watch::Receiver<bool>) {
    loop {
        let now = engine.clock().now();
        let next = match engine.settings().window.next_cutoff(now) {
            Ok(next) => next,
            Err(e) => {
                error!("cannot schedule daily reset: {e}");
                return;
            }
        };
        let wait = Duration::from_millis((next - now).max(0) as u64);
        info!("next daily reset in {}s", wait.as_secs());
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.changed() => break,
        }

        if let Err(e) = engine.reset_availability().await {
            error!("daily reset failed: {e}");
        }
    }
    debug!("daily reset stopped");
}

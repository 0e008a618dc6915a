use tracing::{info, warn};
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

/// One unit fewer, or `None` when the spot is full.
pub(crate) fn decremented(available: u32) -> Option<u32> {
    available.checked_sub(1)
}

/// One unit more, never beyond capacity.
pub(crate) fn incremented(available: u32, capacity: u32) -> u32 {
    available.saturating_add(1).min(capacity)
}

impl Engine {
    /// Claim one free unit. `Ok(false)` when none is left; the counter
    /// is compared and written under the spot's write lock.
    pub async fn try_decrement(&self, spot_id: Ulid) -> Result<bool, EngineError> {
        let spot = self.store.spot(&spot_id)?;
        let mut guard = spot.write().await;
        let Some(available) = decremented(guard.available) else {
            return Ok(false);
        };
        self.persist_spot(&mut guard, Event::AvailabilityChanged { spot_id, available })
            .await?;
        Ok(true)
    }

    /// Give one unit back. Already at capacity is a no-op.
    pub async fn increment(&self, spot_id: Ulid) -> Result<(), EngineError> {
        let spot = self.store.spot(&spot_id)?;
        let mut guard = spot.write().await;
        let available = incremented(guard.available, guard.capacity);
        if available == guard.available {
            warn!("spot {spot_id} already at capacity {}, release ignored", guard.capacity);
            return Ok(());
        }
        self.persist_spot(&mut guard, Event::AvailabilityChanged { spot_id, available })
            .await
    }

    /// Undo a claim on a failure path; the original error is what the caller reports.
    pub(super) async fn restore_unit(&self, spot_id: Ulid) {
        if let Err(e) = self.increment(spot_id).await {
            tracing::error!("failed to give back unit on spot {spot_id}: {e}");
        }
    }

    /// End-of-day reset: every spot back to full capacity. Returns spots touched.
    pub async fn reset_availability(&self) -> Result<usize, EngineError> {
        let mut touched = 0;
        for spot_id in self.store.spot_ids() {
            let spot = self.store.spot(&spot_id)?;
            let mut guard = spot.write().await;
            if guard.available == guard.capacity {
                continue;
            }
            let available = guard.capacity;
            self.persist_spot(&mut guard, Event::AvailabilityChanged { spot_id, available })
                .await?;
            touched += 1;
        }
        metrics::counter!(crate::observability::SPOT_RESETS_TOTAL).increment(touched as u64);
        info!("daily reset restored availability on {touched} spots");
        Ok(touched)
    }
}

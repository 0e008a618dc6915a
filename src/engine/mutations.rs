use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError, Entity};

fn validate_spot(name: Option<&str>, capacity: u32, rates: &Rates) -> Result<(), EngineError> {
    if let Some(n) = name
        && n.len() > MAX_NAME_LEN
    {
        return Err(EngineError::LimitExceeded("spot name too long"));
    }
    if capacity == 0 {
        return Err(EngineError::Invalid("capacity must be at least 1"));
    }
    if capacity > MAX_SPOT_CAPACITY {
        return Err(EngineError::LimitExceeded("capacity too large"));
    }
    if rates.booking_rate < Decimal::ZERO
        || rates.check_in_penalty_rate < Decimal::ZERO
        || rates.check_out_penalty_rate < Decimal::ZERO
    {
        return Err(EngineError::Invalid("rates must not be negative"));
    }
    if rates.booking_rate > MAX_RATE
        || rates.check_in_penalty_rate > MAX_RATE
        || rates.check_out_penalty_rate > MAX_RATE
    {
        return Err(EngineError::LimitExceeded("rate too large"));
    }
    Ok(())
}

/// Free units after a capacity change: the difference moves `available`,
/// which then stays within `0..=capacity`.
pub(crate) fn resized_available(available: u32, old_capacity: u32, new_capacity: u32) -> u32 {
    let shifted = available as i64 + new_capacity as i64 - old_capacity as i64;
    shifted.clamp(0, new_capacity as i64) as u32
}

impl Engine {
    pub async fn create_spot(
        &self,
        id: Ulid,
        lot_id: Ulid,
        name: Option<String>,
        capacity: u32,
        rates: Rates,
    ) -> Result<SpotInfo, EngineError> {
        validate_spot(name.as_deref(), capacity, &rates)?;
        if self.store.spot_count() >= MAX_SPOTS {
            return Err(EngineError::LimitExceeded("too many spots"));
        }

        let state = SpotState::new(id, lot_id, name.clone(), capacity, rates);
        let info = state.info();
        let spot = Arc::new(RwLock::new(state));
        // Publish it locked: a racing reader waits until it is durable.
        let _guard = spot.clone().write_owned().await;
        match self.store.spots.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(Entity::Spot, id)),
            Entry::Vacant(slot) => {
                slot.insert(spot);
            }
        }
        let _gate = self.gate.read().await;
        let event = Event::SpotCreated {
            id,
            lot_id,
            name,
            capacity,
            rates,
        };
        if let Err(e) = self.wal_append(&event).await {
            self.store.spots.remove(&id);
            return Err(e);
        }
        info!("created spot {id} in lot {lot_id} with capacity {capacity}");
        Ok(info)
    }

    /// Change tariff and capacity. Existing bookings keep the rates they were priced at.
    pub async fn update_spot(&self, id: Ulid, capacity: u32, rates: Rates) -> Result<SpotInfo, EngineError> {
        validate_spot(None, capacity, &rates)?;
        let spot = self.store.spot(&id)?;
        let mut guard = spot.write().await;
        let available = resized_available(guard.available, guard.capacity, capacity);
        self.persist_spot(
            &mut guard,
            Event::SpotUpdated {
                id,
                capacity,
                available,
                rates,
            },
        )
        .await?;
        info!("updated spot {id}: capacity {capacity}, available {available}");
        Ok(guard.info())
    }

    /// Rewrite the WAL from live state.
    ///
    /// Takes the compaction gate exclusively, so no append is between its WAL
    /// write and its apply, then snapshots every entity with `try_*` locks.
    /// Returns `Ok(false)` and leaves the log alone if any entity is busy.
    pub async fn compact_wal(&self) -> Result<bool, EngineError> {
        let _gate = self.gate.write().await;
        let mut events = Vec::new();

        let spots: Vec<_> = self.store.spots.iter().map(|e| e.value().clone()).collect();
        for spot in &spots {
            let Ok(guard) = spot.try_read() else {
                return Ok(false);
            };
            events.push(Event::SpotCreated {
                id: guard.id,
                lot_id: guard.lot_id,
                name: guard.name.clone(),
                capacity: guard.capacity,
                rates: guard.rates,
            });
            if guard.available != guard.capacity {
                events.push(Event::AvailabilityChanged {
                    spot_id: guard.id,
                    available: guard.available,
                });
            }
        }

        let wallets: Vec<_> = self.store.wallets.iter().map(|e| e.value().clone()).collect();
        for wallet in &wallets {
            let Ok(guard) = wallet.try_lock() else {
                return Ok(false);
            };
            events.push(Event::WalletCreated {
                user_id: guard.user_id,
                at: guard.transactions.first().map_or(guard.updated_at, |t| t.at),
            });
            if !guard.transactions.is_empty() {
                events.push(Event::WalletPosted {
                    user_id: guard.user_id,
                    entries: guard.transactions.clone(),
                });
            }
        }

        let mut bookings = Vec::new();
        for entry in self.store.bookings.iter() {
            let Ok(guard) = entry.value().try_lock() else {
                return Ok(false);
            };
            bookings.push(guard.clone());
        }
        bookings.sort_by_key(|b| b.id);
        events.extend(bookings.into_iter().map(|booking| Event::BookingSaved { booking }));

        let count = events.len();
        self.wal.compact(events).await?;
        info!("compacted WAL to {count} events");
        Ok(true)
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.wal.appends_since_compact().await
    }
}

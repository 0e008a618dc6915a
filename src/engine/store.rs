use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};
use ulid::Ulid;

use crate::lock::LockTable;
use crate::model::*;

use super::{EngineError, Entity, SharedBooking, SharedSpotState, SharedWallet};

/// The durable store's in-memory side: every entity behind its own lock.
pub struct Store {
    pub(super) spots: DashMap<Ulid, SharedSpotState>,
    pub(super) bookings: DashMap<Ulid, SharedBooking>,
    pub(super) wallets: DashMap<Ulid, SharedWallet>,
    /// user → booking ids, oldest first.
    pub(super) user_bookings: DashMap<Ulid, Vec<Ulid>>,
    /// Lock records for the store-backed lock. Not persisted: a restart
    /// releases everything, like expiry would.
    pub(super) locks: Arc<LockTable>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            spots: DashMap::new(),
            bookings: DashMap::new(),
            wallets: DashMap::new(),
            user_bookings: DashMap::new(),
            locks: Arc::new(LockTable::new()),
        }
    }

    /// Rebuild from a replayed log. Runs before the store is shared, so it
    /// folds into plain maps and only wraps entities in locks at the end.
    pub fn from_events(events: &[Event]) -> Self {
        let mut spots: HashMap<Ulid, SpotState> = HashMap::new();
        let mut bookings: HashMap<Ulid, Booking> = HashMap::new();
        let mut wallets: HashMap<Ulid, Wallet> = HashMap::new();

        for event in events {
            match event {
                Event::SpotCreated {
                    id,
                    lot_id,
                    name,
                    capacity,
                    rates,
                } => {
                    spots.insert(*id, SpotState::new(*id, *lot_id, name.clone(), *capacity, *rates));
                }
                Event::SpotUpdated { id, .. } => {
                    if let Some(spot) = spots.get_mut(id) {
                        apply_to_spot(spot, event);
                    }
                }
                Event::AvailabilityChanged { spot_id, .. } => {
                    if let Some(spot) = spots.get_mut(spot_id) {
                        apply_to_spot(spot, event);
                    }
                }
                Event::BookingSaved { booking } => {
                    if let Some(spot) = spots.get_mut(&booking.spot_id) {
                        spot.sync_reservation(booking);
                    }
                    bookings.insert(booking.id, booking.clone());
                }
                Event::BookingDeleted { id, spot_id } => {
                    if let Some(spot) = spots.get_mut(spot_id) {
                        spot.remove_reservation(*id);
                    }
                    bookings.remove(id);
                }
                Event::WalletCreated { user_id, at } => {
                    wallets
                        .entry(*user_id)
                        .or_insert_with(|| Wallet::new(*user_id, *at));
                }
                Event::WalletPosted { user_id, entries } => {
                    if let Some(wallet) = wallets.get_mut(user_id) {
                        post_entries(wallet, entries);
                    }
                }
            }
        }

        let store = Self::new();
        for (id, spot) in spots {
            store.spots.insert(id, Arc::new(RwLock::new(spot)));
        }
        for (id, wallet) in wallets {
            store.wallets.insert(id, Arc::new(Mutex::new(wallet)));
        }
        let mut ordered: Vec<Booking> = bookings.into_values().collect();
        // ULIDs sort by creation time.
        ordered.sort_by_key(|b| b.id);
        for booking in ordered {
            store.index_booking(booking);
        }
        store
    }

    // ── Lookups ──────────────────────────────────────────────

    pub fn spot(&self, id: &Ulid) -> Result<SharedSpotState, EngineError> {
        self.spots
            .get(id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(Entity::Spot, *id))
    }

    pub fn booking(&self, id: &Ulid) -> Result<SharedBooking, EngineError> {
        self.bookings
            .get(id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(Entity::Booking, *id))
    }

    pub fn wallet(&self, user_id: &Ulid) -> Result<SharedWallet, EngineError> {
        self.wallets
            .get(user_id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(Entity::Wallet, *user_id))
    }

    pub fn spot_count(&self) -> usize {
        self.spots.len()
    }

    pub fn spot_ids(&self) -> Vec<Ulid> {
        self.spots.iter().map(|e| *e.key()).collect()
    }

    pub fn booking_ids(&self) -> Vec<Ulid> {
        self.bookings.iter().map(|e| *e.key()).collect()
    }

    pub fn user_booking_ids(&self, user_id: &Ulid) -> Vec<Ulid> {
        self.user_bookings
            .get(user_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    // ── Booking index ────────────────────────────────────────

    pub(super) fn index_booking(&self, booking: Booking) {
        self.user_bookings
            .entry(booking.user_id)
            .or_default()
            .push(booking.id);
        self.bookings.insert(booking.id, Arc::new(Mutex::new(booking)));
    }

    pub(super) fn unindex_booking(&self, id: &Ulid, user_id: &Ulid) {
        self.bookings.remove(id);
        if let Some(mut ids) = self.user_bookings.get_mut(user_id) {
            ids.retain(|b| b != id);
        }
    }
}

// ── Event application ────────────────────────────────────

/// Apply a spot-scoped event (no locking; caller holds the lock).
pub(super) fn apply_to_spot(spot: &mut SpotState, event: &Event) {
    match event {
        Event::SpotUpdated {
            capacity,
            available,
            rates,
            ..
        } => {
            spot.capacity = *capacity;
            spot.available = *available;
            spot.rates = *rates;
        }
        Event::AvailabilityChanged { available, .. } => {
            spot.available = *available;
        }
        Event::BookingSaved { booking } => spot.sync_reservation(booking),
        Event::BookingDeleted { id, .. } => {
            spot.remove_reservation(*id);
        }
        Event::SpotCreated { .. } | Event::WalletCreated { .. } | Event::WalletPosted { .. } => {}
    }
}

/// Balance moves by the sum of the entries; history keeps each one.
pub(super) fn post_entries(wallet: &mut Wallet, entries: &[TransactionRef]) {
    for entry in entries {
        wallet.balance += entry.amount;
        wallet.updated_at = wallet.updated_at.max(entry.at);
        wallet.transactions.push(entry.clone());
    }
}

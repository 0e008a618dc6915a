mod availability;
mod breakup;
mod conflict;
mod error;
mod lifecycle;
mod mutations;
mod queries;
mod store;
mod sweeps;
mod wallet;
mod writer;

pub use breakup::{calculate as calculate_breakup, Breakup};
pub use error::{ConflictKind, EngineError, Entity, ErrorKind};
pub use lifecycle::{Scan, StartBooking};
pub use queries::TokenPreview;
pub use store::Store;
pub use sweeps::SweepReport;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};

use crate::clock::Clock;
use crate::limits::{DEFAULT_LOCK_TTL_MS, DEFAULT_LOCK_WAIT_MS, DEFAULT_NO_SHOW_GRACE_MS};
use crate::lock::{LockBackend, LockManager, StoreLock};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::pricing::BookingWindow;
use crate::wal::Wal;

use writer::WalHandle;

pub type SharedSpotState = Arc<RwLock<SpotState>>;
pub type SharedBooking = Arc<Mutex<Booking>>;
pub type SharedWallet = Arc<Mutex<Wallet>>;

/// Engine tunables. `Config::engine_settings` builds these from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub lock_ttl: Duration,
    pub lock_wait: Duration,
    pub no_show_grace_ms: Ms,
    pub window: BookingWindow,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_millis(DEFAULT_LOCK_TTL_MS),
            lock_wait: Duration::from_millis(DEFAULT_LOCK_WAIT_MS),
            no_show_grace_ms: DEFAULT_NO_SHOW_GRACE_MS,
            window: BookingWindow::default(),
        }
    }
}

pub struct Engine {
    pub(super) store: Store,
    pub(super) wal: WalHandle,
    pub notify: Arc<NotifyHub>,
    pub(super) lock: LockManager,
    pub(super) clock: Clock,
    pub(super) settings: Settings,
    /// Held shared across every WAL-append-then-apply, exclusively by compaction,
    /// so a snapshot never misses an appended but not yet applied event.
    pub(super) gate: RwLock<()>,
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        settings: Settings,
        clock: Clock,
        notify: Arc<NotifyHub>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = WalHandle::spawn(Wal::open(&wal_path)?);

        let store = Store::from_events(&events);
        tracing::info!(
            "replayed {} WAL events: {} spots, {} bookings, {} wallets",
            events.len(),
            store.spots.len(),
            store.bookings.len(),
            store.wallets.len()
        );
        let lock = LockManager::new(
            Arc::new(StoreLock::new(store.locks.clone())),
            settings.lock_ttl,
        );

        Ok(Self {
            store,
            wal,
            notify,
            lock,
            clock,
            settings,
            gate: RwLock::new(()),
        })
    }

    /// Swap the default in-process lock for another backend, e.g. Redis.
    pub fn with_lock_backend(mut self, backend: Arc<dyn LockBackend>) -> Self {
        self.lock = LockManager::new(backend, self.settings.lock_ttl);
        self
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn lock_backend(&self) -> &'static str {
        self.lock.backend_name()
    }

    /// Drop lock-table records whose holder let them expire.
    pub fn purge_expired_locks(&self) -> usize {
        self.store.locks.purge_expired()
    }

    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        self.wal.append(event.clone()).await
    }

    /// WAL-append + apply for a spot-scoped event. Caller holds the spot's write lock.
    pub(super) async fn persist_spot(&self, spot: &mut SpotState, event: Event) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        self.wal_append(&event).await?;
        store::apply_to_spot(spot, &event);
        Ok(())
    }

    /// WAL-append + apply one atomic posting. Caller holds the wallet's lock.
    pub(super) async fn persist_wallet(
        &self,
        wallet: &mut Wallet,
        entries: Vec<TransactionRef>,
    ) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        let event = Event::WalletPosted {
            user_id: wallet.user_id,
            entries,
        };
        self.wal_append(&event).await?;
        if let Event::WalletPosted { entries, .. } = &event {
            store::post_entries(wallet, entries);
        }
        Ok(())
    }

    /// Save a new version of an existing booking. Caller holds the booking's lock.
    ///
    /// A live booking whose window changed is re-checked for overlap under
    /// the spot's write lock, so the reservation index can never hold two
    /// overlapping live windows.
    pub(super) async fn persist_booking(
        &self,
        booking: &mut Booking,
        updated: Booking,
    ) -> Result<(), EngineError> {
        let spot = self.store.spot(&updated.spot_id)?;
        let mut spot = spot.write().await;
        if updated.status.is_live() && updated.span() != booking.span() {
            conflict::check_no_overlap(&spot, &updated.span(), Some(updated.id))?;
        }
        let _gate = self.gate.read().await;
        self.wal_append(&Event::BookingSaved {
            booking: updated.clone(),
        })
        .await?;
        spot.sync_reservation(&updated);
        *booking = updated;
        Ok(())
    }

    /// Commit a brand new booking. Fails with `Conflict` if a live booking
    /// overlaps, even when the caller skipped the distributed lock.
    pub(super) async fn insert_booking(&self, booking: Booking) -> Result<(), EngineError> {
        let spot = self.store.spot(&booking.spot_id)?;
        let mut spot = spot.write().await;
        conflict::check_no_overlap(&spot, &booking.span(), None)?;
        let _gate = self.gate.read().await;
        self.wal_append(&Event::BookingSaved {
            booking: booking.clone(),
        })
        .await?;
        spot.sync_reservation(&booking);
        self.store.index_booking(booking);
        Ok(())
    }
}

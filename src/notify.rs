use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;
use ulid::Ulid;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingEventKind {
    Created,
    CheckedIn,
    Extended,
    Completed,
    Cancelled,
    /// Removed by an administrator while still live.
    Deleted,
}

/// Fire-and-forget notice of a lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingEvent {
    pub booking_id: Ulid,
    pub lot_id: Ulid,
    pub spot_id: Ulid,
    pub user_id: Ulid,
    pub kind: BookingEventKind,
    pub auto: bool,
}

impl BookingEvent {
    /// JSON body for external sinks.
    pub fn payload(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Broadcast hub for booking events, per lot plus a firehose.
pub struct NotifyHub {
    lots: DashMap<Ulid, broadcast::Sender<BookingEvent>>,
    all: broadcast::Sender<BookingEvent>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            lots: DashMap::new(),
            all: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to one lot. Creates the channel if needed.
    pub fn subscribe(&self, lot_id: Ulid) -> broadcast::Receiver<BookingEvent> {
        let sender = self
            .lots
            .entry(lot_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<BookingEvent> {
        self.all.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, event: BookingEvent) {
        if let Some(sender) = self.lots.get(&event.lot_id) {
            let _ = sender.send(event.clone());
        }
        let _ = self.all.send(event);
    }

    pub fn remove(&self, lot_id: &Ulid) {
        self.lots.remove(lot_id);
    }
}

/// Live bookings per lot, folded from the firehose. Eventually consistent;
/// nothing in the core reads it for admission.
#[derive(Default)]
pub struct LotOccupancy {
    live: DashMap<Ulid, i64>,
}

impl LotOccupancy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&self, event: &BookingEvent) {
        let delta = match event.kind {
            BookingEventKind::Created => 1,
            BookingEventKind::Completed | BookingEventKind::Cancelled | BookingEventKind::Deleted => -1,
            BookingEventKind::CheckedIn | BookingEventKind::Extended => 0,
        };
        if delta != 0 {
            *self.live.entry(event.lot_id).or_insert(0) += delta;
        }
    }

    pub fn live_bookings(&self, lot_id: &Ulid) -> i64 {
        self.live.get(lot_id).map(|v| *v).unwrap_or(0)
    }

    /// Consume until the hub is dropped. Lagging just skips ahead.
    pub async fn run(self: Arc<Self>, mut rx: broadcast::Receiver<BookingEvent>) {
        loop {
            match rx.recv().await {
                Ok(event) => self.apply(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("occupancy consumer lagged by {n} events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

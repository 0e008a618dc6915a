use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 3_600_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

// ── Spots ────────────────────────────────────────────────────────

/// Per-spot tariff. `booking_rate` is per started hour, penalty rates are per
/// minute beyond the grace period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rates {
    pub booking_rate: Decimal,
    pub check_in_penalty_rate: Decimal,
    pub check_out_penalty_rate: Decimal,
}

/// A live (pending or active) booking's claim on a spot's time axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub booking_id: Ulid,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct SpotState {
    pub id: Ulid,
    pub lot_id: Ulid,
    pub name: Option<String>,
    pub capacity: u32,
    /// Free units; only the availability ledger writes this.
    pub available: u32,
    pub rates: Rates,
    /// Live reservations, sorted by `span.start`.
    pub reservations: Vec<Reservation>,
}

impl SpotState {
    pub fn new(id: Ulid, lot_id: Ulid, name: Option<String>, capacity: u32, rates: Rates) -> Self {
        Self {
            id,
            lot_id,
            name,
            capacity,
            available: capacity,
            rates,
            reservations: Vec::new(),
        }
    }

    /// Insert reservation maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, booking_id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.booking_id == booking_id)?;
        Some(self.reservations.remove(pos))
    }

    /// Bring the reservation index in line with a booking's persisted state:
    /// live bookings hold exactly one reservation, terminal ones none.
    pub fn sync_reservation(&mut self, booking: &Booking) {
        self.remove_reservation(booking.id);
        if booking.status.is_live() {
            self.insert_reservation(Reservation {
                booking_id: booking.id,
                span: booking.span(),
            });
        }
    }

    /// Return only reservations whose span overlaps the query window.
    /// Uses binary search to skip reservations starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }

    pub fn info(&self) -> SpotInfo {
        SpotInfo {
            id: self.id,
            lot_id: self.lot_id,
            name: self.name.clone(),
            capacity: self.capacity,
            available: self.available,
            rates: self.rates,
        }
    }
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Active,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }

    /// Pending and active bookings occupy their window.
    pub fn is_live(self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Active => "active",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub user_id: Ulid,
    pub spot_id: Ulid,
    pub lot_id: Ulid,
    pub status: BookingStatus,
    /// Charge for the reserved window at the time it was (last) priced.
    pub amount: Decimal,
    /// Tariff captured when booked; later spot updates don't reprice it.
    pub rates: Rates,
    pub scheduled_check_in: Ms,
    pub scheduled_check_out: Ms,
    pub actual_check_in: Option<Ms>,
    pub actual_check_out: Option<Ms>,
    pub cancelled_at: Option<Ms>,
    pub vehicle_number: String,
    /// Set once the check-out token has been consumed.
    pub qr_code_scanned: bool,
    /// Closed by the scheduler rather than by the user.
    pub auto_completed: bool,
    /// Desk operator who checked the car in or out; `None` for self-service.
    pub check_in_operator: Option<Ulid>,
    pub check_out_operator: Option<Ulid>,
    pub created_at: Ms,
}

impl Booking {
    pub fn span(&self) -> Span {
        Span::new(self.scheduled_check_in, self.scheduled_check_out)
    }
}

// ── Wallets ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    TopUp,
    BookingCharge,
    ExtensionCharge,
    LateCheckInPenalty,
    LateCheckOutPenalty,
    Refund,
    /// Undo of a charge whose booking could not be committed.
    ChargeReversal,
}

impl TxKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TxKind::TopUp => "wallet_topup",
            TxKind::BookingCharge => "booking_charge",
            TxKind::ExtensionCharge => "extension_charge",
            TxKind::LateCheckInPenalty => "late_check_in_penalty",
            TxKind::LateCheckOutPenalty => "late_check_out_penalty",
            TxKind::Refund => "booking_refund",
            TxKind::ChargeReversal => "charge_reversal",
        }
    }
}

/// One applied ledger entry. Credits are positive, debits negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRef {
    pub reference_id: Ulid,
    pub booking_id: Option<Ulid>,
    pub kind: TxKind,
    pub amount: Decimal,
    pub at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: Ulid,
    pub balance: Decimal,
    pub transactions: Vec<TransactionRef>,
    pub updated_at: Ms,
}

impl Wallet {
    pub fn new(user_id: Ulid, at: Ms) -> Self {
        Self {
            user_id,
            balance: Decimal::ZERO,
            transactions: Vec::new(),
            updated_at: at,
        }
    }

    /// `balance == Σ transaction amounts`.
    pub fn reconciles(&self) -> bool {
        let sum: Decimal = self.transactions.iter().map(|t| t.amount).sum();
        sum == self.balance
    }
}

// ── WAL records ──────────────────────────────────────────────────

/// Flat event types, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SpotCreated {
        id: Ulid,
        lot_id: Ulid,
        name: Option<String>,
        capacity: u32,
        rates: Rates,
    },
    SpotUpdated {
        id: Ulid,
        capacity: u32,
        available: u32,
        rates: Rates,
    },
    AvailabilityChanged {
        spot_id: Ulid,
        available: u32,
    },
    /// Full record upsert; the reservation index follows the status.
    BookingSaved {
        booking: Booking,
    },
    BookingDeleted {
        id: Ulid,
        spot_id: Ulid,
    },
    WalletCreated {
        user_id: Ulid,
        at: Ms,
    },
    /// Entries applied atomically; the balance moves by their sum.
    WalletPosted {
        user_id: Ulid,
        entries: Vec<TransactionRef>,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpotInfo {
    pub id: Ulid,
    pub lot_id: Ulid,
    pub name: Option<String>,
    pub capacity: u32,
    pub available: u32,
    pub rates: Rates,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn rates() -> Rates {
        Rates {
            booking_rate: dec!(50),
            check_in_penalty_rate: dec!(1),
            check_out_penalty_rate: dec!(2),
        }
    }

    fn spot() -> SpotState {
        SpotState::new(Ulid::new(), Ulid::new(), None, 1, rates())
    }

    fn reservation(start: Ms, end: Ms) -> Reservation {
        Reservation {
            booking_id: Ulid::new(),
            span: Span::new(start, end),
        }
    }

    fn booking(status: BookingStatus, start: Ms, end: Ms) -> Booking {
        Booking {
            id: Ulid::new(),
            user_id: Ulid::new(),
            spot_id: Ulid::new(),
            lot_id: Ulid::new(),
            status,
            amount: dec!(100),
            rates: rates(),
            scheduled_check_in: start,
            scheduled_check_out: end,
            actual_check_in: None,
            actual_check_out: None,
            cancelled_at: None,
            vehicle_number: "KA01AB1234".into(),
            qr_code_scanned: false,
            auto_completed: false,
            check_in_operator: None,
            check_out_operator: None,
            created_at: 0,
        }
    }

    #[test]
    fn span_overlap_is_half_open() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        assert_eq!(a.duration_ms(), 100);
    }

    #[test]
    fn reservations_stay_sorted() {
        let mut s = spot();
        s.insert_reservation(reservation(300, 400));
        s.insert_reservation(reservation(100, 200));
        s.insert_reservation(reservation(200, 300));
        let starts: Vec<Ms> = s.reservations.iter().map(|r| r.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut s = spot();
        s.insert_reservation(reservation(100, 200));
        s.insert_reservation(reservation(450, 600));
        s.insert_reservation(reservation(1000, 1100));

        let hits: Vec<_> = s.overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut s = spot();
        s.insert_reservation(reservation(100, 200));
        assert_eq!(s.overlapping(&Span::new(200, 300)).count(), 0);
    }

    #[test]
    fn sync_reservation_follows_status() {
        let mut s = spot();
        let mut b = booking(BookingStatus::Pending, 100, 200);
        s.sync_reservation(&b);
        assert_eq!(s.reservations.len(), 1);

        b.scheduled_check_out = 400;
        s.sync_reservation(&b);
        assert_eq!(s.reservations.len(), 1);
        assert_eq!(s.reservations[0].span, Span::new(100, 400));

        b.status = BookingStatus::Completed;
        s.sync_reservation(&b);
        assert!(s.reservations.is_empty());
    }

    #[test]
    fn status_classification() {
        assert!(BookingStatus::Pending.is_live());
        assert!(BookingStatus::Active.is_live());
        assert!(BookingStatus::Completed.is_terminal());
        assert!(BookingStatus::Cancelled.is_terminal());
        assert_eq!(BookingStatus::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn wallet_reconciliation() {
        let mut w = Wallet::new(Ulid::new(), 0);
        assert!(w.reconciles());
        w.transactions.push(TransactionRef {
            reference_id: Ulid::new(),
            booking_id: None,
            kind: TxKind::TopUp,
            amount: dec!(200),
            at: 0,
        });
        assert!(!w.reconciles());
        w.balance = dec!(200);
        assert!(w.reconciles());
    }

    #[test]
    fn event_survives_bincode() {
        let event = Event::BookingSaved {
            booking: booking(BookingStatus::Active, 1_000, 2_000),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}

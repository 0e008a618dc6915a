use rust_decimal::Decimal;
use serde::Serialize;
use ulid::Ulid;

use crate::model::*;
use crate::pricing::penalty_with_grace;

use super::breakup::{calculate, Breakup};
use super::lifecycle::verify_token;
use super::{Engine, EngineError};

/// What scanning a token now would do, without doing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenPreview {
    pub booking_id: Ulid,
    pub valid: bool,
    pub penalty: Decimal,
    pub message: String,
}

impl TokenPreview {
    fn rejected(booking_id: Ulid, message: impl Into<String>) -> Self {
        Self {
            booking_id,
            valid: false,
            penalty: Decimal::ZERO,
            message: message.into(),
        }
    }
}

impl Engine {
    // ── Spots ────────────────────────────────────────────────

    pub async fn get_spot(&self, id: Ulid) -> Result<SpotInfo, EngineError> {
        let spot = self.store.spot(&id)?;
        let guard = spot.read().await;
        Ok(guard.info())
    }

    pub async fn list_spots(&self, lot_id: Option<Ulid>) -> Vec<SpotInfo> {
        let mut spots = Vec::new();
        for id in self.store.spot_ids() {
            let Ok(spot) = self.store.spot(&id) else { continue };
            let guard = spot.read().await;
            if lot_id.is_none_or(|lot| lot == guard.lot_id) {
                spots.push(guard.info());
            }
        }
        spots.sort_by_key(|s| s.id);
        spots
    }

    // ── Bookings ─────────────────────────────────────────────

    pub async fn booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let shared = self.store.booking(&id)?;
        let guard = shared.lock().await;
        Ok(guard.clone())
    }

    /// Oldest first.
    pub async fn bookings_for_user(&self, user_id: Ulid) -> Vec<Booking> {
        let mut out = Vec::new();
        for id in self.store.user_booking_ids(&user_id) {
            if let Ok(shared) = self.store.booking(&id) {
                out.push(shared.lock().await.clone());
            }
        }
        out
    }

    pub async fn bookings_by_status(&self, status: BookingStatus) -> Vec<Booking> {
        self.bookings_where(|b| b.status == status).await
    }

    pub async fn active_booking_for_user(&self, user_id: Ulid) -> Option<Booking> {
        self.find_active_booking(user_id, None).await
    }

    /// Case-insensitive plate match, optionally narrowed to one status.
    pub async fn find_by_vehicle(&self, vehicle_number: &str, status: Option<BookingStatus>) -> Vec<Booking> {
        let wanted = vehicle_number.trim();
        self.bookings_where(|b| {
            b.vehicle_number.eq_ignore_ascii_case(wanted) && status.is_none_or(|s| b.status == s)
        })
        .await
    }

    async fn bookings_where(&self, keep: impl Fn(&Booking) -> bool) -> Vec<Booking> {
        let mut out = Vec::new();
        for id in self.store.booking_ids() {
            let Ok(shared) = self.store.booking(&id) else { continue };
            let booking = shared.lock().await;
            if keep(&*booking) {
                out.push(booking.clone());
            }
        }
        out.sort_by_key(|b| b.id);
        out
    }

    /// Breakdown of a completed or cancelled booking.
    pub async fn breakup(&self, booking_id: Ulid) -> Result<Breakup, EngineError> {
        let booking = self.booking(booking_id).await?;
        calculate(&booking).ok_or(EngineError::IllegalState {
            id: booking.id,
            status: booking.status,
            action: "compute breakup for",
        })
    }

    // ── Wallets ──────────────────────────────────────────────

    pub async fn wallet(&self, user_id: Ulid) -> Result<Wallet, EngineError> {
        let wallet = self.store.wallet(&user_id)?;
        let guard = wallet.lock().await;
        Ok(guard.clone())
    }

    pub async fn transactions(&self, user_id: Ulid) -> Result<Vec<TransactionRef>, EngineError> {
        Ok(self.wallet(user_id).await?.transactions)
    }

    /// `balance == Σ transactions` for the user's wallet.
    pub async fn reconcile(&self, user_id: Ulid) -> Result<bool, EngineError> {
        Ok(self.wallet(user_id).await?.reconciles())
    }

    // ── Token preview ────────────────────────────────────────

    pub async fn preview_check_in(&self, booking_id: Ulid, token: &str) -> Result<TokenPreview, EngineError> {
        let booking = self.booking(booking_id).await?;
        if verify_token(booking_id, token).is_err() {
            return Ok(TokenPreview::rejected(booking_id, "token does not match booking"));
        }
        if booking.status != BookingStatus::Pending {
            return Ok(TokenPreview::rejected(
                booking_id,
                format!("booking is {}, check-in needs pending", booking.status),
            ));
        }
        let penalty = penalty_with_grace(
            booking.scheduled_check_in,
            self.clock.now(),
            booking.rates.check_in_penalty_rate,
        );
        Ok(TokenPreview {
            booking_id,
            valid: true,
            penalty,
            message: if penalty.is_zero() {
                "on time".into()
            } else {
                format!("late check-in penalty {penalty}")
            },
        })
    }

    pub async fn preview_check_out(&self, booking_id: Ulid, token: &str) -> Result<TokenPreview, EngineError> {
        let booking = self.booking(booking_id).await?;
        if verify_token(booking_id, token).is_err() {
            return Ok(TokenPreview::rejected(booking_id, "token does not match booking"));
        }
        if booking.status != BookingStatus::Active {
            return Ok(TokenPreview::rejected(
                booking_id,
                format!("booking is {}, check-out needs active", booking.status),
            ));
        }
        let now = self.clock.now();
        let check_in = penalty_with_grace(
            booking.scheduled_check_in,
            booking.actual_check_in.unwrap_or(booking.scheduled_check_in),
            booking.rates.check_in_penalty_rate,
        );
        let check_out = penalty_with_grace(
            booking.scheduled_check_out,
            now,
            booking.rates.check_out_penalty_rate,
        );
        let penalty = check_in + check_out;
        Ok(TokenPreview {
            booking_id,
            valid: true,
            penalty,
            message: if penalty.is_zero() {
                "no penalties".into()
            } else {
                format!("penalties {check_in} (check-in) + {check_out} (check-out)")
            },
        })
    }
}

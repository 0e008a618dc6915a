//! Monetary breakdown of a terminal booking.
//!
//! `calculate` reads only the booking's persisted fields, so a booking closed
//! by its user and one closed by the scheduler get the same treatment for the
//! same facts. `Engine::settle` turns a breakdown into wallet entries.

use rust_decimal::Decimal;
use serde::Serialize;
use ulid::Ulid;

use crate::model::*;
use crate::pricing::penalty_with_grace;

use super::wallet::entry;
use super::{Engine, EngineError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Breakup {
    pub booking_id: Ulid,
    pub status: BookingStatus,
    pub booking_charge: Decimal,
    pub late_check_in_penalty: Decimal,
    pub late_check_out_penalty: Decimal,
    pub subtotal: Decimal,
    pub refund_amount: Decimal,
    pub total_deducted: Decimal,
    pub auto_completed: bool,
    pub rates: Rates,
}

impl Breakup {
    pub fn penalties(&self) -> Decimal {
        self.late_check_in_penalty + self.late_check_out_penalty
    }
}

/// `None` for a booking that is still live.
pub fn calculate(booking: &Booking) -> Option<Breakup> {
    let rates = booking.rates;
    let (late_check_in_penalty, late_check_out_penalty, refund_amount) = match booking.status {
        BookingStatus::Pending | BookingStatus::Active => return None,
        BookingStatus::Completed => {
            let checked_in = booking.actual_check_in.unwrap_or(booking.scheduled_check_in);
            let checked_out = booking.actual_check_out.unwrap_or(booking.scheduled_check_out);
            let check_in = penalty_with_grace(
                booking.scheduled_check_in,
                checked_in,
                rates.check_in_penalty_rate,
            );
            let check_out = penalty_with_grace(
                booking.scheduled_check_out,
                checked_out,
                rates.check_out_penalty_rate,
            );
            // A scheduler-closed overstay forfeits the base charge.
            let refund = if booking.auto_completed {
                Decimal::ZERO
            } else {
                booking.amount
            };
            (check_in, check_out, refund)
        }
        BookingStatus::Cancelled => {
            let cancelled_at = booking.cancelled_at.unwrap_or(booking.scheduled_check_in);
            if cancelled_at <= booking.scheduled_check_in {
                (Decimal::ZERO, Decimal::ZERO, booking.amount)
            } else {
                // Cancelled after the window opened: lateness runs until the
                // vehicle arrived, or until the cancellation if it never did.
                let arrived = booking.actual_check_in.unwrap_or(cancelled_at);
                let check_in = penalty_with_grace(
                    booking.scheduled_check_in,
                    arrived,
                    rates.check_in_penalty_rate,
                );
                let refund = if booking.auto_completed {
                    Decimal::ZERO
                } else {
                    booking.amount
                };
                (check_in, Decimal::ZERO, refund)
            }
        }
    };

    let subtotal = booking.amount + late_check_in_penalty + late_check_out_penalty;
    Some(Breakup {
        booking_id: booking.id,
        status: booking.status,
        booking_charge: booking.amount,
        late_check_in_penalty,
        late_check_out_penalty,
        subtotal,
        refund_amount,
        total_deducted: subtotal - refund_amount,
        auto_completed: booking.auto_completed,
        rates,
    })
}

impl Engine {
    /// Apply a breakdown to the booking owner's wallet: both penalties and the
    /// refund go in as one posting, so they land together or not at all.
    pub(super) async fn settle(&self, booking: &Booking, breakup: &Breakup) -> Result<(), EngineError> {
        let at = self.clock.now();
        let mut entries = Vec::new();
        if breakup.late_check_in_penalty > Decimal::ZERO {
            entries.push(entry(
                TxKind::LateCheckInPenalty,
                -breakup.late_check_in_penalty,
                Some(booking.id),
                at,
            ));
        }
        if breakup.late_check_out_penalty > Decimal::ZERO {
            entries.push(entry(
                TxKind::LateCheckOutPenalty,
                -breakup.late_check_out_penalty,
                Some(booking.id),
                at,
            ));
        }
        if breakup.refund_amount > Decimal::ZERO {
            entries.push(entry(TxKind::Refund, breakup.refund_amount, Some(booking.id), at));
        }
        self.post_unchecked(booking.user_id, entries).await
    }
}

use tracing::{debug, error, info};
use ulid::Ulid;

use crate::model::*;
use crate::observability;

use super::breakup::Breakup;
use super::{Engine, EngineError};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub completed: usize,
    pub cancelled: usize,
    pub failed: usize,
}

/// Checked in, past its scheduled end, and never scanned out.
fn is_overstayed(booking: &Booking, now: Ms) -> bool {
    booking.status == BookingStatus::Active
        && booking.scheduled_check_out <= now
        && !booking.qr_code_scanned
}

/// Never checked in and the grace window after scheduled check-in has passed.
fn is_no_show(booking: &Booking, now: Ms, grace: Ms) -> bool {
    booking.status == BookingStatus::Pending && booking.scheduled_check_in + grace < now
}

impl Engine {
    /// Candidates only: bookings locked by a live request are skipped and
    /// picked up on the next run, and each one is re-checked under its lock.
    pub fn collect_overstayed(&self, now: Ms) -> Vec<Ulid> {
        self.collect_bookings(|b| is_overstayed(b, now))
    }

    pub fn collect_no_shows(&self, now: Ms) -> Vec<Ulid> {
        let grace = self.settings.no_show_grace_ms;
        self.collect_bookings(|b| is_no_show(b, now, grace))
    }

    fn collect_bookings(&self, matches: impl Fn(&Booking) -> bool) -> Vec<Ulid> {
        let mut ids = Vec::new();
        for entry in self.store.bookings.iter() {
            if let Ok(booking) = entry.value().try_lock()
                && matches(&*booking)
            {
                ids.push(booking.id);
            }
        }
        ids
    }

    /// Close an overstayed booking on the user's behalf. `Ok(None)` if it
    /// no longer qualifies (checked out, cancelled, or already swept).
    pub async fn auto_complete(&self, booking_id: Ulid) -> Result<Option<Breakup>, EngineError> {
        let mut booking = self.lock_booking(&booking_id).await?;
        let now = self.clock.now();
        if !is_overstayed(&booking, now) {
            debug!("booking {booking_id} no longer overstayed ({})", booking.status);
            return Ok(None);
        }
        let mut updated = booking.clone();
        updated.status = BookingStatus::Completed;
        updated.actual_check_out = Some(now);
        updated.auto_completed = true;
        self.close(&mut booking, updated, "scheduler").await.map(Some)
    }

    /// Cancel a booking nobody showed up for.
    pub async fn auto_cancel_no_show(&self, booking_id: Ulid) -> Result<Option<Breakup>, EngineError> {
        let mut booking = self.lock_booking(&booking_id).await?;
        let now = self.clock.now();
        if !is_no_show(&booking, now, self.settings.no_show_grace_ms) {
            debug!("booking {booking_id} no longer a no-show ({})", booking.status);
            return Ok(None);
        }
        let mut updated = booking.clone();
        updated.status = BookingStatus::Cancelled;
        updated.cancelled_at = Some(now);
        updated.auto_completed = true;
        self.close(&mut booking, updated, "scheduler").await.map(Some)
    }

    /// One pass of both sweeps. A failing booking is logged and counted;
    /// the rest of the batch still runs.
    pub async fn run_sweeps(&self) -> SweepReport {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        for id in self.collect_overstayed(now) {
            match self.auto_complete(id).await {
                Ok(Some(_)) => report.completed += 1,
                Ok(None) => {}
                Err(e) => {
                    error!("overstay sweep failed for booking {id}: {e}");
                    report.failed += 1;
                }
            }
        }
        for id in self.collect_no_shows(now) {
            match self.auto_cancel_no_show(id).await {
                Ok(Some(_)) => report.cancelled += 1,
                Ok(None) => {}
                Err(e) => {
                    error!("no-show sweep failed for booking {id}: {e}");
                    report.failed += 1;
                }
            }
        }

        metrics::counter!(observability::SWEEP_RUNS_TOTAL).increment(1);
        metrics::counter!(observability::SWEEP_BOOKINGS_TOTAL, "sweep" => "overstay")
            .increment(report.completed as u64);
        metrics::counter!(observability::SWEEP_BOOKINGS_TOTAL, "sweep" => "no_show")
            .increment(report.cancelled as u64);
        metrics::counter!(observability::SWEEP_FAILURES_TOTAL).increment(report.failed as u64);
        if report != SweepReport::default() {
            info!(
                "sweep: {} auto-completed, {} auto-cancelled, {} failed",
                report.completed, report.cancelled, report.failed
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn booking(status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            user_id: Ulid::new(),
            spot_id: Ulid::new(),
            lot_id: Ulid::new(),
            status,
            amount: dec!(50),
            rates: Rates {
                booking_rate: dec!(50),
                check_in_penalty_rate: dec!(1),
                check_out_penalty_rate: dec!(1),
            },
            scheduled_check_in: 10 * HOUR_MS,
            scheduled_check_out: 11 * HOUR_MS,
            actual_check_in: None,
            actual_check_out: None,
            cancelled_at: None,
            vehicle_number: "TN09BC7777".into(),
            qr_code_scanned: false,
            auto_completed: false,
            check_in_operator: None,
            check_out_operator: None,
            created_at: 0,
        }
    }

    #[test]
    fn overstay_needs_active_past_end_and_unscanned() {
        let mut b = booking(BookingStatus::Active);
        assert!(!is_overstayed(&b, 11 * HOUR_MS - 1));
        assert!(is_overstayed(&b, 11 * HOUR_MS));
        b.qr_code_scanned = true;
        assert!(!is_overstayed(&b, 12 * HOUR_MS));
        assert!(!is_overstayed(&booking(BookingStatus::Pending), 12 * HOUR_MS));
    }

    #[test]
    fn no_show_waits_out_grace() {
        let b = booking(BookingStatus::Pending);
        let grace = 30 * MINUTE_MS;
        assert!(!is_no_show(&b, 10 * HOUR_MS + grace, grace));
        assert!(is_no_show(&b, 10 * HOUR_MS + grace + 1, grace));
        assert!(!is_no_show(&booking(BookingStatus::Active), 12 * HOUR_MS, grace));
    }
}

use std::sync::Arc;

use tokio::sync::OwnedMutexGuard;
use tracing::{info, warn};
use ulid::Ulid;

use crate::lock::{spot_resource, user_resource};
use crate::model::*;
use crate::notify::{BookingEvent, BookingEventKind};
use crate::observability::{self, error_label};
use crate::pricing::charge;

use super::breakup::{calculate, Breakup};
use super::conflict::{check_no_overlap, validate_vehicle, validate_window};
use super::{ConflictKind, Engine, EngineError, Entity};

/// A request to reserve a spot for `[check_in, check_out)`.
#[derive(Debug, Clone)]
pub struct StartBooking {
    pub spot_id: Ulid,
    pub user_id: Ulid,
    pub check_in: Ms,
    pub check_out: Ms,
    pub vehicle_number: String,
}

/// How a desk identifies the booking it checks in or out.
#[derive(Debug, Clone, Copy)]
pub enum Scan<'a> {
    /// QR token read from the user's booking.
    Token { booking_id: Ulid, token: &'a str },
    /// Licence plate of the booking in the status the transition needs.
    Vehicle(&'a str),
}

/// The check-in/out token is the booking id itself, compared byte for byte.
/// It proves the caller saw the booking, nothing more; it is not a secret.
pub(crate) fn verify_token(booking_id: Ulid, token: &str) -> Result<(), EngineError> {
    if token == booking_id.to_string() {
        Ok(())
    } else {
        Err(EngineError::Invalid("token does not match booking"))
    }
}

pub(crate) fn booking_event(booking: &Booking, kind: BookingEventKind) -> BookingEvent {
    BookingEvent {
        booking_id: booking.id,
        lot_id: booking.lot_id,
        spot_id: booking.spot_id,
        user_id: booking.user_id,
        kind,
        auto: booking.auto_completed,
    }
}

fn illegal(booking: &Booking, action: &'static str) -> EngineError {
    EngineError::IllegalState {
        id: booking.id,
        status: booking.status,
        action,
    }
}

impl Engine {
    /// Lock a booking, failing if it was deleted while we waited.
    pub(super) async fn lock_booking(&self, id: &Ulid) -> Result<OwnedMutexGuard<Booking>, EngineError> {
        let shared = self.store.booking(id)?;
        let guard = shared.clone().lock_owned().await;
        match self.store.bookings.get(id) {
            Some(current) if Arc::ptr_eq(current.value(), &shared) => Ok(guard),
            _ => Err(EngineError::NotFound(Entity::Booking, *id)),
        }
    }

    pub async fn start_booking(&self, req: StartBooking) -> Result<Booking, EngineError> {
        let result = self.start_booking_inner(req).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => error_label(e),
        };
        metrics::counter!(observability::BOOKINGS_STARTED_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn start_booking_inner(&self, req: StartBooking) -> Result<Booking, EngineError> {
        let span = validate_window(req.check_in, req.check_out)?;
        validate_vehicle(&req.vehicle_number)?;
        self.settings.window.validate(self.clock.now(), &span)?;

        // Fail fast on funds before queueing for the spot; the debit
        // under the lock is what actually decides.
        let rate = self.store.spot(&req.spot_id)?.read().await.rates.booking_rate;
        self.ensure_sufficient_balance(req.user_id, charge(span.start, span.end, rate))
            .await?;

        let resource = spot_resource(&req.spot_id);
        self.lock
            .with_lock(&resource, self.settings.lock_wait, move || self.admit(req, span))
            .await
    }

    /// Validate, claim a unit, debit, persist. Runs under the spot's lock;
    /// every failure after the claim gives back what was taken.
    async fn admit(&self, req: StartBooking, span: Span) -> Result<Booking, EngineError> {
        let spot = self.store.spot(&req.spot_id)?;
        let (lot_id, rates) = {
            let guard = spot.read().await;
            if let Err(e) = check_no_overlap(&guard, &span, None) {
                warn!("rejected booking on spot {}: {e}", req.spot_id);
                return Err(e);
            }
            (guard.lot_id, guard.rates)
        };
        let amount = charge(span.start, span.end, rates.booking_rate);

        if !self.try_decrement(req.spot_id).await? {
            warn!("rejected booking on spot {}: no units left", req.spot_id);
            return Err(EngineError::Conflict(ConflictKind::NoCapacity(req.spot_id)));
        }

        let now = self.clock.now();
        let booking = Booking {
            id: Ulid::new(),
            user_id: req.user_id,
            spot_id: req.spot_id,
            lot_id,
            status: BookingStatus::Pending,
            amount,
            rates,
            scheduled_check_in: span.start,
            scheduled_check_out: span.end,
            actual_check_in: None,
            actual_check_out: None,
            cancelled_at: None,
            vehicle_number: req.vehicle_number,
            qr_code_scanned: false,
            auto_completed: false,
            check_in_operator: None,
            check_out_operator: None,
            created_at: now,
        };

        if let Err(e) = self
            .debit_checked(booking.user_id, amount, TxKind::BookingCharge, Some(booking.id))
            .await
        {
            self.restore_unit(booking.spot_id).await;
            return Err(e);
        }

        if let Err(e) = self.insert_booking(booking.clone()).await {
            if amount > rust_decimal::Decimal::ZERO
                && let Err(undo) = self
                    .credit(booking.user_id, amount, TxKind::ChargeReversal, Some(booking.id))
                    .await
            {
                tracing::error!("booking {} not saved and charge not reversed: {undo}", booking.id);
            }
            self.restore_unit(booking.spot_id).await;
            return Err(e);
        }

        self.notify.send(booking_event(&booking, BookingEventKind::Created));
        info!(
            "booking {} started on spot {} for user {} ({amount})",
            booking.id, booking.spot_id, booking.user_id
        );
        Ok(booking)
    }

    /// Booking `scan` points at. A plate resolves to its earliest booking in `status`.
    async fn resolve_scan(&self, scan: Scan<'_>, status: BookingStatus) -> Result<Ulid, EngineError> {
        match scan {
            Scan::Token { booking_id, token } => {
                verify_token(booking_id, token)?;
                Ok(booking_id)
            }
            Scan::Vehicle(plate) => {
                validate_vehicle(plate)?;
                self.find_by_vehicle(plate, Some(status))
                    .await
                    .into_iter()
                    .min_by_key(|b| (b.scheduled_check_in, b.id))
                    .map(|b| b.id)
                    .ok_or_else(|| EngineError::VehicleNotFound {
                        vehicle: plate.trim().to_string(),
                        status,
                    })
            }
        }
    }

    /// Self-service check-in with the booking's token.
    pub async fn check_in(&self, booking_id: Ulid, token: &str) -> Result<Booking, EngineError> {
        self.scan_in(Scan::Token { booking_id, token }, None).await
    }

    /// Pending → active. One active booking per user, checked under the user's lock.
    pub async fn scan_in(&self, scan: Scan<'_>, operator: Option<Ulid>) -> Result<Booking, EngineError> {
        let booking_id = self.resolve_scan(scan, BookingStatus::Pending).await?;
        let user_id = self.lock_booking(&booking_id).await?.user_id;

        let resource = user_resource(&user_id);
        self.lock
            .with_lock(&resource, self.settings.lock_wait, move || async move {
                if self.find_active_booking(user_id, Some(booking_id)).await.is_some() {
                    return Err(EngineError::Conflict(ConflictKind::ActiveBookingExists(user_id)));
                }
                let mut booking = self.lock_booking(&booking_id).await?;
                if booking.status != BookingStatus::Pending {
                    return Err(illegal(&booking, "check in"));
                }
                let mut updated = booking.clone();
                updated.status = BookingStatus::Active;
                updated.actual_check_in = Some(self.clock.now());
                updated.check_in_operator = operator;
                self.persist_booking(&mut booking, updated).await?;

                self.notify.send(booking_event(&booking, BookingEventKind::CheckedIn));
                metrics::counter!(observability::CHECK_INS_TOTAL).increment(1);
                info!("booking {booking_id} checked in");
                Ok(booking.clone())
            })
            .await
    }

    /// Self-service check-out with the booking's token.
    pub async fn check_out(&self, booking_id: Ulid, token: &str) -> Result<Breakup, EngineError> {
        self.scan_out(Scan::Token { booking_id, token }, None).await
    }

    /// Active → completed. Checking out a completed booking again by token
    /// returns its breakdown without moving money.
    pub async fn scan_out(&self, scan: Scan<'_>, operator: Option<Ulid>) -> Result<Breakup, EngineError> {
        let booking_id = self.resolve_scan(scan, BookingStatus::Active).await?;
        let mut booking = self.lock_booking(&booking_id).await?;
        match booking.status {
            BookingStatus::Active => {}
            BookingStatus::Completed => {
                return calculate(&booking).ok_or_else(|| illegal(&booking, "check out"));
            }
            _ => return Err(illegal(&booking, "check out")),
        }
        let mut updated = booking.clone();
        updated.status = BookingStatus::Completed;
        updated.actual_check_out = Some(self.clock.now());
        updated.qr_code_scanned = true;
        updated.check_out_operator = operator;
        let actor = if operator.is_some() { "operator" } else { "user" };
        self.close(&mut booking, updated, actor).await
    }

    /// Push an active booking's check-out later, paying the difference.
    pub async fn extend_booking(&self, booking_id: Ulid, new_check_out: Ms) -> Result<Booking, EngineError> {
        let spot_id = self.lock_booking(&booking_id).await?.spot_id;
        let resource = spot_resource(&spot_id);
        self.lock
            .with_lock(&resource, self.settings.lock_wait, move || async move {
                let mut booking = self.lock_booking(&booking_id).await?;
                if booking.status != BookingStatus::Active {
                    return Err(illegal(&booking, "extend"));
                }
                if new_check_out <= booking.scheduled_check_out {
                    return Err(EngineError::Invalid("new check-out must be after the current one"));
                }
                validate_window(booking.scheduled_check_in, new_check_out)?;
                let delta = Span::new(booking.scheduled_check_out, new_check_out);
                self.validate_overlap(spot_id, delta, Some(booking_id)).await?;

                let new_amount = charge(
                    booking.scheduled_check_in,
                    new_check_out,
                    booking.rates.booking_rate,
                );
                let diff = new_amount - booking.amount;
                let debited = diff > rust_decimal::Decimal::ZERO;
                if debited {
                    self.debit_checked(booking.user_id, diff, TxKind::ExtensionCharge, Some(booking_id))
                        .await?;
                }

                let mut updated = booking.clone();
                updated.scheduled_check_out = new_check_out;
                updated.amount = new_amount;
                if let Err(e) = self.persist_booking(&mut booking, updated).await {
                    if debited
                        && let Err(undo) = self
                            .credit(booking.user_id, diff, TxKind::ChargeReversal, Some(booking_id))
                            .await
                    {
                        tracing::error!("extension of {booking_id} failed and was not reversed: {undo}");
                    }
                    return Err(e);
                }

                self.notify.send(booking_event(&booking, BookingEventKind::Extended));
                info!("booking {booking_id} extended to {new_check_out} (+{diff})");
                Ok(booking.clone())
            })
            .await
    }

    /// Cancel a live booking. `Ok(None)` if it was already cancelled.
    pub async fn cancel_booking(&self, booking_id: Ulid) -> Result<Option<Breakup>, EngineError> {
        let mut booking = self.lock_booking(&booking_id).await?;
        match booking.status {
            BookingStatus::Cancelled => return Ok(None),
            BookingStatus::Completed => return Err(illegal(&booking, "cancel")),
            BookingStatus::Pending | BookingStatus::Active => {}
        }
        let mut updated = booking.clone();
        updated.status = BookingStatus::Cancelled;
        updated.cancelled_at = Some(self.clock.now());
        self.close(&mut booking, updated, "user").await.map(Some)
    }

    /// Shared terminal transition for users and the scheduler.
    ///
    /// The terminal status is persisted before any money moves, so a second
    /// actor arriving later sees it and stops; settlement then happens once.
    pub(super) async fn close(
        &self,
        booking: &mut Booking,
        updated: Booking,
        actor: &'static str,
    ) -> Result<Breakup, EngineError> {
        let breakup = calculate(&updated).ok_or_else(|| illegal(&updated, "close"))?;
        self.persist_booking(booking, updated).await?;

        if let Err(e) = self.settle(booking, &breakup).await {
            tracing::error!(
                "booking {} is {} but settlement failed: {e}",
                booking.id,
                booking.status
            );
            return Err(e);
        }
        self.increment(booking.spot_id).await?;

        let kind = match booking.status {
            BookingStatus::Cancelled => BookingEventKind::Cancelled,
            _ => BookingEventKind::Completed,
        };
        self.notify.send(booking_event(booking, kind));
        metrics::counter!(
            observability::BOOKINGS_CLOSED_TOTAL,
            "status" => booking.status.as_str(),
            "actor" => actor
        )
        .increment(1);
        info!(
            "booking {} {} by {actor}: penalties {}, refund {}",
            booking.id,
            booking.status,
            breakup.penalties(),
            breakup.refund_amount
        );
        Ok(breakup)
    }

    /// Administrative status override. Moves no money; a live booking
    /// forced terminal still gives its unit back. Forcing a booking active
    /// keeps the one-active-booking-per-user rule.
    pub async fn update_status(&self, booking_id: Ulid, status: BookingStatus) -> Result<Booking, EngineError> {
        if status != BookingStatus::Active {
            return self.override_status(booking_id, status).await;
        }
        let user_id = self.lock_booking(&booking_id).await?.user_id;
        let resource = user_resource(&user_id);
        self.lock
            .with_lock(&resource, self.settings.lock_wait, move || async move {
                if self.find_active_booking(user_id, Some(booking_id)).await.is_some() {
                    return Err(EngineError::Conflict(ConflictKind::ActiveBookingExists(user_id)));
                }
                self.override_status(booking_id, status).await
            })
            .await
    }

    async fn override_status(&self, booking_id: Ulid, status: BookingStatus) -> Result<Booking, EngineError> {
        let mut booking = self.lock_booking(&booking_id).await?;
        if booking.status.is_terminal() {
            return Err(illegal(&booking, "update"));
        }
        if booking.status == status {
            return Ok(booking.clone());
        }
        let now = self.clock.now();
        let mut updated = booking.clone();
        updated.status = status;
        let kind = match status {
            BookingStatus::Pending => return Err(illegal(&booking, "reopen")),
            BookingStatus::Active => {
                updated.actual_check_in.get_or_insert(now);
                BookingEventKind::CheckedIn
            }
            BookingStatus::Completed => {
                updated.actual_check_out = Some(now);
                BookingEventKind::Completed
            }
            BookingStatus::Cancelled => {
                updated.cancelled_at = Some(now);
                BookingEventKind::Cancelled
            }
        };
        self.persist_booking(&mut booking, updated).await?;
        if status.is_terminal() {
            self.increment(booking.spot_id).await?;
        }
        self.notify.send(booking_event(&booking, kind));
        warn!("booking {booking_id} set to {status} by administrator, no settlement");
        Ok(booking.clone())
    }

    /// Administrative delete of a live booking. Moves no money.
    pub async fn delete_booking(&self, booking_id: Ulid) -> Result<(), EngineError> {
        let booking = self.lock_booking(&booking_id).await?;
        if booking.status.is_terminal() {
            return Err(illegal(&booking, "delete"));
        }
        {
            let spot = self.store.spot(&booking.spot_id)?;
            let mut spot = spot.write().await;
            let _gate = self.gate.read().await;
            self.wal_append(&Event::BookingDeleted {
                id: booking_id,
                spot_id: booking.spot_id,
            })
            .await?;
            spot.remove_reservation(booking_id);
            self.store.unindex_booking(&booking_id, &booking.user_id);
        }
        self.increment(booking.spot_id).await?;
        self.notify.send(booking_event(&booking, BookingEventKind::Deleted));
        warn!("booking {booking_id} deleted by administrator");
        Ok(())
    }

    /// The user's active booking other than `exclude`, if any.
    pub(super) async fn find_active_booking(&self, user_id: Ulid, exclude: Option<Ulid>) -> Option<Booking> {
        for id in self.store.user_booking_ids(&user_id) {
            if Some(id) == exclude {
                continue;
            }
            let Ok(shared) = self.store.booking(&id) else { continue };
            let booking = shared.lock().await;
            if booking.status == BookingStatus::Active {
                return Some(booking.clone());
            }
        }
        None
    }
}

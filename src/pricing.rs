//! Pure charge, penalty and booking-window rules.

use chrono::{DateTime, FixedOffset, NaiveTime, TimeZone};
use rust_decimal::Decimal;

use crate::engine::{ConflictKind, EngineError};
use crate::limits::{DEFAULT_CUTOFF_HOUR, DEFAULT_UTC_OFFSET_MINUTES, GRACE_MINUTES};
use crate::model::{Ms, Span, HOUR_MS, MINUTE_MS};

/// `ceil(hours(check_out - check_in)) * rate`. Partial hours are billed whole.
pub fn charge(check_in: Ms, check_out: Ms, rate_per_hour: Decimal) -> Decimal {
    let duration = check_out - check_in;
    if duration <= 0 {
        return Decimal::ZERO;
    }
    let hours = (duration + HOUR_MS - 1) / HOUR_MS;
    Decimal::from(hours) * rate_per_hour
}

/// Whole minutes `actual` is past `scheduled`, never negative.
pub fn minutes_late(scheduled: Ms, actual: Ms) -> i64 {
    ((actual - scheduled) / MINUTE_MS).max(0)
}

/// Zero within the grace period, then `rate` for every minute beyond it.
pub fn penalty_with_grace(scheduled: Ms, actual: Ms, rate_per_minute: Decimal) -> Decimal {
    let late = minutes_late(scheduled, actual);
    if late <= GRACE_MINUTES {
        return Decimal::ZERO;
    }
    Decimal::from(late - GRACE_MINUTES) * rate_per_minute
}

/// Same-day / next-day admission rule around a nightly reset.
///
/// Before the cutoff a booking must start today and end no later than
/// today's cutoff. From the cutoff on, bookings must start tomorrow.
#[derive(Debug, Clone, Copy)]
pub struct BookingWindow {
    offset: FixedOffset,
    cutoff: NaiveTime,
}

impl BookingWindow {
    pub fn new(utc_offset_minutes: i32, cutoff_hour: u32) -> Option<Self> {
        Some(Self {
            offset: FixedOffset::east_opt(utc_offset_minutes.checked_mul(60)?)?,
            cutoff: NaiveTime::from_hms_opt(cutoff_hour, 0, 0)?,
        })
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn cutoff(&self) -> NaiveTime {
        self.cutoff
    }

    fn local(&self, t: Ms) -> Result<DateTime<FixedOffset>, EngineError> {
        DateTime::from_timestamp_millis(t)
            .map(|utc| utc.with_timezone(&self.offset))
            .ok_or(EngineError::LimitExceeded("timestamp out of range"))
    }

    pub fn validate(&self, now: Ms, span: &Span) -> Result<(), EngineError> {
        let now_local = self.local(now)?;
        let today = now_local.date_naive();
        let check_in_day = self.local(span.start)?.date_naive();

        if now_local.time() < self.cutoff {
            if check_in_day != today {
                return Err(EngineError::Conflict(ConflictKind::OutsideBookingWindow(
                    "bookings before the cutoff must be for today",
                )));
            }
            let cutoff_today = self
                .offset
                .from_local_datetime(&today.and_time(self.cutoff))
                .single()
                .ok_or(EngineError::LimitExceeded("timestamp out of range"))?;
            if span.end > cutoff_today.timestamp_millis() {
                return Err(EngineError::Conflict(ConflictKind::OutsideBookingWindow(
                    "bookings before the cutoff must end by the cutoff",
                )));
            }
        } else {
            let tomorrow = today
                .succ_opt()
                .ok_or(EngineError::LimitExceeded("timestamp out of range"))?;
            if check_in_day != tomorrow {
                return Err(EngineError::Conflict(ConflictKind::OutsideBookingWindow(
                    "bookings after the cutoff must be for tomorrow",
                )));
            }
        }
        Ok(())
    }

    /// Next instant strictly after `now` where local time equals the cutoff.
    pub fn next_cutoff(&self, now: Ms) -> Result<Ms, EngineError> {
        let now_local = self.local(now)?;
        let mut day = now_local.date_naive();
        if now_local.time() >= self.cutoff {
            day = day
                .succ_opt()
                .ok_or(EngineError::LimitExceeded("timestamp out of range"))?;
        }
        self.offset
            .from_local_datetime(&day.and_time(self.cutoff))
            .single()
            .map(|dt| dt.timestamp_millis())
            .ok_or(EngineError::LimitExceeded("timestamp out of range"))
    }
}

impl Default for BookingWindow {
    fn default() -> Self {
        Self::new(DEFAULT_UTC_OFFSET_MINUTES, DEFAULT_CUTOFF_HOUR)
            .expect("default booking window is valid")
    }
}

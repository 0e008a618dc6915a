use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{ConflictKind, Engine, EngineError};

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_BOOKING_DURATION_MS {
        return Err(EngineError::LimitExceeded("booking window too long"));
    }
    Ok(())
}

pub(crate) fn validate_window(check_in: Ms, check_out: Ms) -> Result<Span, EngineError> {
    if check_out <= check_in {
        return Err(EngineError::Invalid("check-out must be after check-in"));
    }
    let span = Span::new(check_in, check_out);
    validate_span(&span)?;
    Ok(span)
}

pub(crate) fn validate_vehicle(vehicle_number: &str) -> Result<(), EngineError> {
    if vehicle_number.trim().is_empty() {
        return Err(EngineError::Invalid("vehicle number is required"));
    }
    if vehicle_number.len() > MAX_VEHICLE_NUMBER_LEN {
        return Err(EngineError::LimitExceeded("vehicle number too long"));
    }
    Ok(())
}

/// Half-open overlap against every live reservation on the spot,
/// optionally ignoring one booking (its own extension).
pub(crate) fn check_no_overlap(
    spot: &SpotState,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match spot
        .overlapping(span)
        .find(|r| Some(r.booking_id) != exclude)
    {
        Some(existing) => Err(EngineError::Conflict(ConflictKind::Overlap(existing.booking_id))),
        None => Ok(()),
    }
}

impl Engine {
    /// Is `[span.start, span.end)` free on the spot? A point-in-time answer:
    /// only a check repeated under the spot's lock is authoritative.
    pub async fn validate_overlap(
        &self,
        spot_id: Ulid,
        span: Span,
        exclude: Option<Ulid>,
    ) -> Result<(), EngineError> {
        validate_span(&span)?;
        let spot = self.store.spot(&spot_id)?;
        let guard = spot.read().await;
        check_no_overlap(&guard, &span, exclude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn spot_with(reservations: &[(Ulid, Ms, Ms)]) -> SpotState {
        let mut spot = SpotState::new(
            Ulid::new(),
            Ulid::new(),
            None,
            1,
            Rates {
                booking_rate: dec!(50),
                check_in_penalty_rate: dec!(1),
                check_out_penalty_rate: dec!(1),
            },
        );
        for (id, start, end) in reservations {
            spot.insert_reservation(Reservation {
                booking_id: *id,
                span: Span::new(*start, *end),
            });
        }
        spot
    }

    #[test]
    fn overlap_names_the_blocking_booking() {
        let blocker = Ulid::new();
        let spot = spot_with(&[(blocker, 100, 200)]);
        let err = check_no_overlap(&spot, &Span::new(150, 300), None).unwrap_err();
        assert!(matches!(err, EngineError::Conflict(ConflictKind::Overlap(id)) if id == blocker));
    }

    #[test]
    fn touching_windows_are_admissible() {
        let spot = spot_with(&[(Ulid::new(), 100, 200)]);
        assert!(check_no_overlap(&spot, &Span::new(200, 300), None).is_ok());
        assert!(check_no_overlap(&spot, &Span::new(0, 100), None).is_ok());
    }

    #[test]
    fn own_reservation_is_excluded() {
        let me = Ulid::new();
        let other = Ulid::new();
        let spot = spot_with(&[(me, 100, 200), (other, 300, 400)]);
        assert!(check_no_overlap(&spot, &Span::new(150, 300), Some(me)).is_ok());
        assert!(check_no_overlap(&spot, &Span::new(150, 350), Some(me)).is_err());
    }

    #[test]
    fn window_must_be_ordered_and_bounded() {
        assert!(matches!(validate_window(200, 200), Err(EngineError::Invalid(_))));
        assert!(matches!(validate_window(300, 200), Err(EngineError::Invalid(_))));
        assert!(matches!(
            validate_window(0, MAX_BOOKING_DURATION_MS + 1),
            Err(EngineError::LimitExceeded(_))
        ));
        assert_eq!(validate_window(100, 200).unwrap(), Span::new(100, 200));
    }

    #[test]
    fn vehicle_number_required() {
        assert!(validate_vehicle("  ").is_err());
        assert!(validate_vehicle(&"X".repeat(MAX_VEHICLE_NUMBER_LEN + 1)).is_err());
        assert!(validate_vehicle("KA05MN4321").is_ok());
    }
}

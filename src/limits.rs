use rust_decimal::Decimal;

use crate::model::{Ms, HOUR_MS, MINUTE_MS};

pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 9999-12-31T23:59:59Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_000;

/// A booking never spans more than two days; the daily cutoff keeps real ones far shorter.
pub const MAX_BOOKING_DURATION_MS: Ms = 48 * HOUR_MS;

pub const MAX_SPOTS: usize = 100_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_VEHICLE_NUMBER_LEN: usize = 32;
pub const MAX_SPOT_CAPACITY: u32 = 10_000;

/// Ceiling for every spot rate. A century of penalty minutes at this rate
/// still fits in a `Decimal`.
pub const MAX_RATE: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

/// Lateness tolerated before a per-minute penalty starts.
pub const GRACE_MINUTES: i64 = 10;

/// A pending booking this long past its scheduled check-in is a no-show.
pub const DEFAULT_NO_SHOW_GRACE_MS: Ms = 30 * MINUTE_MS;

pub const LOCK_BACKOFF_INITIAL_MS: u64 = 50;
pub const LOCK_BACKOFF_MAX_MS: u64 = 500;

/// Asia/Kolkata, where the nightly reset happens at 20:00.
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = 330;
pub const DEFAULT_CUTOFF_HOUR: u32 = 20;

pub const DEFAULT_LOCK_TTL_MS: u64 = 10_000;
pub const DEFAULT_LOCK_WAIT_MS: u64 = 10_000;

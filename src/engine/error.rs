use rust_decimal::Decimal;
use ulid::Ulid;

use crate::model::BookingStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Spot,
    Booking,
    Wallet,
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Entity::Spot => "spot",
            Entity::Booking => "booking",
            Entity::Wallet => "wallet",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictKind {
    /// Window overlaps this live booking.
    Overlap(Ulid),
    /// Spot has no free unit.
    NoCapacity(Ulid),
    /// User already holds an active booking.
    ActiveBookingExists(Ulid),
    OutsideBookingWindow(&'static str),
}

/// Coarse classification a service layer maps onto its own status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InsufficientFunds,
    IllegalState,
    LockTimeout,
    BadRequest,
    Internal,
}

#[derive(Debug)]
pub enum EngineError {
    NotFound(Entity, Ulid),
    /// No booking in `status` carries this plate.
    VehicleNotFound {
        vehicle: String,
        status: BookingStatus,
    },
    AlreadyExists(Entity, Ulid),
    Conflict(ConflictKind),
    InsufficientFunds {
        required: Decimal,
        available: Decimal,
    },
    IllegalState {
        id: Ulid,
        status: BookingStatus,
        action: &'static str,
    },
    /// Lock not acquired within the wait budget. Nothing was changed.
    LockTimeout(String),
    Invalid(&'static str),
    LimitExceeded(&'static str),
    Lock(String),
    WalError(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound(..) | EngineError::VehicleNotFound { .. } => ErrorKind::NotFound,
            EngineError::AlreadyExists(..) | EngineError::Conflict(_) => ErrorKind::Conflict,
            EngineError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            EngineError::IllegalState { .. } => ErrorKind::IllegalState,
            EngineError::LockTimeout(_) => ErrorKind::LockTimeout,
            EngineError::Invalid(_) | EngineError::LimitExceeded(_) => ErrorKind::BadRequest,
            EngineError::Lock(_) | EngineError::WalError(_) => ErrorKind::Internal,
        }
    }

    /// Only a lock timeout guarantees no side effect happened.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::LockTimeout(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(entity, id) => write!(f, "{entity} not found: {id}"),
            EngineError::VehicleNotFound { vehicle, status } => {
                write!(f, "no {status} booking found for vehicle {vehicle}")
            }
            EngineError::AlreadyExists(entity, id) => write!(f, "{entity} already exists: {id}"),
            EngineError::Conflict(ConflictKind::Overlap(id)) => {
                write!(f, "booking time overlaps with booking {id}")
            }
            EngineError::Conflict(ConflictKind::NoCapacity(spot)) => {
                write!(f, "no units available on spot {spot}")
            }
            EngineError::Conflict(ConflictKind::ActiveBookingExists(user)) => {
                write!(f, "user {user} already has an active booking")
            }
            EngineError::Conflict(ConflictKind::OutsideBookingWindow(msg)) => {
                write!(f, "outside booking window: {msg}")
            }
            EngineError::InsufficientFunds { required, available } => {
                write!(f, "insufficient funds: required {required}, available {available}")
            }
            EngineError::IllegalState { id, status, action } => {
                write!(f, "cannot {action} booking {id} in status {status}")
            }
            EngineError::LockTimeout(resource) => {
                write!(f, "timed out acquiring lock on {resource}, try again later")
            }
            EngineError::Invalid(msg) => write!(f, "invalid request: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Lock(e) => write!(f, "lock backend error: {e}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

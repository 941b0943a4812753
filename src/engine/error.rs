use ulid::Ulid;

use crate::model::BookingStatus;
use crate::store::StoreError;

use super::window::WindowRejection;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    InvalidWindow(WindowRejection),
    VenueNotFound(Ulid),
    VenueInactive(Ulid),
    /// Carries the id of the active booking holding the slot.
    SlotUnavailable(Ulid),
    InvalidState {
        id: Ulid,
        status: BookingStatus,
        action: &'static str,
    },
    Forbidden(Ulid),
    NotFound(Ulid),
    /// Lost a concurrent update; the caller may retry the whole operation.
    Conflict(Ulid),
    LimitExceeded(&'static str),
    Storage(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidWindow(reason) => write!(f, "invalid booking window: {reason}"),
            EngineError::VenueNotFound(id) => write!(f, "venue not found: {id}"),
            EngineError::VenueInactive(id) => write!(f, "venue is not accepting bookings: {id}"),
            EngineError::SlotUnavailable(id) => {
                write!(f, "slot unavailable: overlaps booking {id}")
            }
            EngineError::InvalidState { id, status, action } => {
                write!(f, "cannot {action} booking {id} in status {status}")
            }
            EngineError::Forbidden(actor) => write!(f, "actor {actor} is not allowed to do this"),
            EngineError::NotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::Conflict(id) => {
                write!(f, "booking {id} was modified concurrently, retry")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<WindowRejection> for EngineError {
    fn from(reason: WindowRejection) -> Self {
        EngineError::InvalidWindow(reason)
    }
}

/// Booking-centric translation. Callers that look up venues map
/// `StoreError::NotFound` to `VenueNotFound` themselves.
impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => EngineError::NotFound(id),
            StoreError::AlreadyExists(id) => EngineError::Conflict(id),
            StoreError::Conflict(existing) => EngineError::SlotUnavailable(existing),
            StoreError::StatusChanged { id, .. } => EngineError::Conflict(id),
            StoreError::LimitExceeded(msg) => EngineError::LimitExceeded(msg),
            StoreError::Wal(e) => EngineError::Storage(e),
        }
    }
}

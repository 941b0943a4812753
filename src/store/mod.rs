//! Storage boundary: the collaborator traits the booking engine consumes,
//! and the durable implementation that enforces the no-overlap invariant.

mod state;
mod wal_store;

pub use state::VenueState;
pub use wal_store::WalStore;

use async_trait::async_trait;
use ulid::Ulid;

use crate::model::*;

/// Compare-and-swap request for a booking's status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub expected: BookingStatus,
    pub new: BookingStatus,
    pub at: Ms,
    /// Attached to the booking together with the status change.
    pub payment: Option<PaymentRef>,
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    /// Any PENDING/CONFIRMED booking on the venue overlapping `span`.
    async fn find_active_overlapping(&self, venue_id: Ulid, span: Span) -> Result<Option<Booking>, StoreError>;

    /// Persist a new PENDING booking. Fails with `Conflict` if an active
    /// booking overlaps it at commit time.
    async fn insert(&self, booking: Booking) -> Result<Booking, StoreError>;

    /// Atomically move `id` from `change.expected` to `change.new`.
    /// Fails with `StatusChanged` if the current status differs.
    async fn update_status(&self, id: Ulid, change: StatusChange) -> Result<Booking, StoreError>;

    async fn find_by_id(&self, id: Ulid) -> Result<Booking, StoreError>;

    async fn list(&self, filter: &BookingFilter) -> Result<Page<Booking>, StoreError>;

    /// Spans of active bookings on the venue that overlap `window`.
    async fn active_spans(&self, venue_id: Ulid, window: Span) -> Result<Vec<Span>, StoreError>;

    /// PENDING bookings created strictly before `cutoff`.
    async fn pending_created_before(&self, cutoff: Ms) -> Result<Vec<Booking>, StoreError>;
}

#[async_trait]
pub trait VenueLookup: Send + Sync {
    async fn get_venue(&self, id: Ulid) -> Result<Venue, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// An active booking with this id overlaps the insert.
    Conflict(Ulid),
    StatusChanged {
        id: Ulid,
        actual: BookingStatus,
    },
    LimitExceeded(&'static str),
    Wal(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "not found: {id}"),
            StoreError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            StoreError::Conflict(id) => write!(f, "overlaps active booking {id}"),
            StoreError::StatusChanged { id, actual } => {
                write!(f, "booking {id} status changed concurrently (now {actual})")
            }
            StoreError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            StoreError::Wal(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

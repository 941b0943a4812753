use ulid::Ulid;

use crate::model::*;
use crate::store::StoreError;

use super::{Engine, EngineError};

impl Engine {
    /// True when no PENDING/CONFIRMED booking on the venue overlaps `span`.
    /// Advisory only: the store repeats the check when the booking commits.
    pub async fn is_available(&self, venue_id: Ulid, span: Span) -> Result<bool, EngineError> {
        Ok(self.active_overlap(venue_id, span).await?.is_none())
    }

    /// `SlotUnavailable` naming the first overlapping active booking.
    pub(super) async fn check_slot(&self, venue_id: Ulid, span: Span) -> Result<(), EngineError> {
        match self.active_overlap(venue_id, span).await? {
            Some(existing) => {
                metrics::counter!(crate::observability::SLOT_CONFLICTS_TOTAL).increment(1);
                tracing::debug!(venue = %venue_id, existing = %existing.id, "slot unavailable");
                Err(EngineError::SlotUnavailable(existing.id))
            }
            None => Ok(()),
        }
    }

    async fn active_overlap(&self, venue_id: Ulid, span: Span) -> Result<Option<Booking>, EngineError> {
        self.bookings
            .find_active_overlapping(venue_id, span)
            .await
            .map_err(|e| match e {
                StoreError::NotFound(id) => EngineError::VenueNotFound(id),
                other => other.into(),
            })
    }
}

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::free_intervals;
use super::window::{WindowRejection, validate_timestamps};
use super::{Engine, EngineError};

fn validate_page(page: u32, page_size: u32) -> Result<(), EngineError> {
    if page == 0 {
        return Err(EngineError::LimitExceeded("page must be at least 1"));
    }
    if page_size == 0 || page_size > MAX_PAGE_SIZE {
        return Err(EngineError::LimitExceeded("page size out of range"));
    }
    Ok(())
}

impl Engine {
    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        Ok(self.bookings.find_by_id(id).await?)
    }

    /// Bookings visible to `actor`, newest first. Non-admins only ever see
    /// their own bookings whatever customer filter they pass.
    pub async fn list_bookings(&self, actor: &Actor, filter: BookingFilter) -> Result<Page<Booking>, EngineError> {
        validate_page(filter.page, filter.page_size)?;
        let mut filter = filter;
        if !actor.is_admin() {
            filter.customer_id = Some(actor.id);
        }
        filter.order = ListOrder::CreatedDesc;
        Ok(self.bookings.list(&filter).await?)
    }

    /// All bookings on a venue, latest start first. Owner or admin only.
    pub async fn venue_bookings(
        &self,
        venue_id: Ulid,
        actor: &Actor,
        page: u32,
        page_size: u32,
    ) -> Result<Page<Booking>, EngineError> {
        validate_page(page, page_size)?;
        let venue = self.venue(venue_id).await?;
        if !actor.is_admin() && actor.id != venue.owner_id {
            return Err(EngineError::Forbidden(actor.id));
        }
        let filter = BookingFilter {
            venue_id: Some(venue_id),
            order: ListOrder::StartDesc,
            page,
            page_size,
            ..BookingFilter::default()
        };
        Ok(self.bookings.list(&filter).await?)
    }

    /// Bookable gaps in `[start, end)` on the venue.
    pub async fn free_slots(&self, venue_id: Ulid, start: Ms, end: Ms) -> Result<Vec<Span>, EngineError> {
        if end <= start {
            return Err(EngineError::InvalidWindow(WindowRejection::EndBeforeStart));
        }
        validate_timestamps(start, end)?;
        if end - start > MAX_AVAILABILITY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("availability window too wide"));
        }

        let query = Span::new(start, end);
        let venue = self.venue(venue_id).await?;
        let busy = self.bookings.active_spans(venue_id, query).await?;
        Ok(free_intervals(venue.hours, &query, &busy))
    }

    /// PENDING bookings whose payment window has lapsed at `now`.
    pub async fn stale_pending(&self) -> Result<Vec<Booking>, EngineError> {
        let now = self.clock.now();
        // created_at + timeout <= now  <=>  created_at < now - timeout + 1
        let cutoff = now.saturating_sub(self.policy.payment_timeout).saturating_add(1);
        Ok(self.bookings.pending_created_before(cutoff).await?)
    }
}

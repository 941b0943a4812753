use ulid::Ulid;

use crate::model::*;

/// Everything the store knows about one venue. Guarded by one `RwLock`, so
/// a write guard makes check-then-insert atomic for the venue.
#[derive(Debug, Clone)]
pub struct VenueState {
    pub venue: Venue,
    /// Every booking ever made on the venue, sorted by `span.start`.
    /// Cancelled and finished bookings stay for history.
    pub bookings: Vec<Booking>,
}

impl VenueState {
    pub fn new(venue: Venue) -> Self {
        Self {
            venue,
            bookings: Vec::new(),
        }
    }

    /// Insert maintaining sort order by span.start (stable for equal starts).
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.span.start <= booking.span.start);
        self.bookings.insert(pos, booking);
    }

    pub fn booking(&self, id: &Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == *id)
    }

    pub fn booking_mut(&mut self, id: &Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == *id)
    }

    /// Bookings (any status) whose span overlaps the query window.
    /// Everything at index >= right_bound starts at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }

    pub fn first_active_overlapping(&self, query: &Span) -> Option<&Booking> {
        self.overlapping(query).find(|b| b.status.is_active())
    }
}

//! Booking lifecycle controller: validation, pricing, refunds, and the
//! status state machine on top of the storage traits.

mod availability;
mod conflict;
mod error;
mod mutations;
mod pricing;
mod queries;
mod refund;
mod window;


use std::sync::Arc;

use ulid::Ulid;

use crate::clock::Clock;
use crate::model::*;
use crate::policy::BookingPolicy;
use crate::store::{BookingRepository, StoreError, VenueLookup, WalStore};

pub use availability::{free_intervals, merge_overlapping, opening_windows, subtract_intervals};
pub use error::EngineError;
pub use pricing::price;
pub use refund::refund;
pub use window::{WindowRejection, validate_operating_hours, validate_timestamps, validate_window};

pub struct Engine {
    bookings: Arc<dyn BookingRepository>,
    venues: Arc<dyn VenueLookup>,
    clock: Arc<dyn Clock>,
    policy: BookingPolicy,
}

impl Engine {
    pub fn new(
        bookings: Arc<dyn BookingRepository>,
        venues: Arc<dyn VenueLookup>,
        clock: Arc<dyn Clock>,
        policy: BookingPolicy,
    ) -> Self {
        Self {
            bookings,
            venues,
            clock,
            policy,
        }
    }

    /// Engine backed by one `WalStore` for both bookings and venues.
    pub fn with_store(store: Arc<WalStore>, clock: Arc<dyn Clock>, policy: BookingPolicy) -> Self {
        Self::new(store.clone(), store, clock, policy)
    }

    pub fn policy(&self) -> &BookingPolicy {
        &self.policy
    }

    pub fn now(&self) -> Ms {
        self.clock.now()
    }

    async fn venue(&self, id: Ulid) -> Result<Venue, EngineError> {
        self.venues.get_venue(id).await.map_err(|e| match e {
            StoreError::NotFound(id) => EngineError::VenueNotFound(id),
            other => other.into(),
        })
    }
}

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{BOOKING_TRANSITIONS_TOTAL, BOOKINGS_CREATED_TOTAL, BOOKINGS_EXPIRED_TOTAL, SLOT_CONFLICTS_TOTAL};
use crate::store::{StatusChange, StoreError};

use super::pricing::price;
use super::refund::refund;
use super::window::{validate_operating_hours, validate_timestamps, validate_window};
use super::{Engine, EngineError};

impl Engine {
    /// Validate, price, and persist a new PENDING booking.
    pub async fn create_booking(&self, req: BookingRequest) -> Result<Booking, EngineError> {
        let now = self.clock.now();
        validate_window(req.start, req.end, now, &self.policy).inspect_err(|reason| {
            tracing::debug!(venue = %req.venue_id, %reason, "booking window rejected");
        })?;
        validate_timestamps(req.start, req.end)?;
        if let Some(ref n) = req.notes
            && n.len() > MAX_NOTES_LEN {
                return Err(EngineError::LimitExceeded("notes too long"));
            }

        let span = Span::new(req.start, req.end);
        let venue = self.venue(req.venue_id).await?;
        if !venue.active {
            return Err(EngineError::VenueInactive(venue.id));
        }
        validate_operating_hours(&venue, &span)?;
        self.check_slot(venue.id, span).await?;

        let total_amount = price(venue.hourly_rate, &span)?;
        let booking = Booking {
            id: Ulid::new(),
            venue_id: venue.id,
            customer_id: req.customer_id,
            span,
            status: BookingStatus::Pending,
            total_amount,
            notes: req.notes,
            payment: None,
            created_at: now,
            updated_at: now,
        };

        let created = self.bookings.insert(booking).await.map_err(|e| match e {
            StoreError::Conflict(existing) => {
                // Lost the race between the advisory check and the commit.
                metrics::counter!(SLOT_CONFLICTS_TOTAL).increment(1);
                EngineError::SlotUnavailable(existing)
            }
            StoreError::NotFound(id) => EngineError::VenueNotFound(id),
            other => other.into(),
        })?;

        metrics::counter!(BOOKINGS_CREATED_TOTAL).increment(1);
        tracing::info!(
            booking = %created.id,
            venue = %created.venue_id,
            customer = %created.customer_id,
            total = %created.total_amount,
            "booking created"
        );
        Ok(created)
    }

    /// Attach a successful payment and move PENDING → CONFIRMED.
    pub async fn confirm_payment(&self, id: Ulid, payment: PaymentRef) -> Result<Booking, EngineError> {
        for field in [&payment.method, &payment.transaction_id] {
            if field.is_empty() {
                return Err(EngineError::LimitExceeded("payment reference field is empty"));
            }
            if field.len() > MAX_PAYMENT_REF_LEN {
                return Err(EngineError::LimitExceeded("payment reference too long"));
            }
        }
        let booking = self.get_booking(id).await?;
        let at = self.clock.now();
        self.transition(&booking, BookingStatus::Confirmed, "confirm payment for", at, Some(payment))
            .await
    }

    /// Cancel on behalf of `actor`, who must be the customer, the venue
    /// owner, or an admin. The refund is assessed at the current time.
    pub async fn cancel_booking(&self, id: Ulid, actor: &Actor) -> Result<RefundOutcome, EngineError> {
        let booking = self.get_booking(id).await?;
        if !actor.is_admin() && actor.id != booking.customer_id {
            let venue = self.venue(booking.venue_id).await?;
            if actor.id != venue.owner_id {
                tracing::debug!(booking = %id, actor = %actor.id, "cancel forbidden");
                return Err(EngineError::Forbidden(actor.id));
            }
        }

        let now = self.clock.now();
        let cancelled = self
            .transition(&booking, BookingStatus::Cancelled, "cancel", now, None)
            .await?;
        let (percent, amount) = refund(cancelled.total_amount, cancelled.span.start, now, &self.policy.refund);
        tracing::info!(booking = %id, actor = %actor.id, percent, refund = %amount, "refund assessed");

        Ok(RefundOutcome {
            booking_id: cancelled.id,
            percent,
            amount,
            payment: cancelled.payment,
        })
    }

    pub async fn mark_completed(&self, id: Ulid) -> Result<Booking, EngineError> {
        let booking = self.get_booking(id).await?;
        let at = self.clock.now();
        self.transition(&booking, BookingStatus::Completed, "complete", at, None).await
    }

    pub async fn mark_no_show(&self, id: Ulid) -> Result<Booking, EngineError> {
        let booking = self.get_booking(id).await?;
        let at = self.clock.now();
        self.transition(&booking, BookingStatus::NoShow, "mark no-show", at, None).await
    }

    /// Cancel a PENDING booking whose payment window has lapsed.
    pub async fn expire_unpaid(&self, id: Ulid) -> Result<Booking, EngineError> {
        let booking = self.get_booking(id).await?;
        let now = self.clock.now();
        let deadline = booking.created_at.saturating_add(self.policy.payment_timeout);
        if booking.status != BookingStatus::Pending || deadline > now {
            return Err(EngineError::InvalidState {
                id,
                status: booking.status,
                action: "expire",
            });
        }
        let expired = self
            .transition(&booking, BookingStatus::Cancelled, "expire", now, None)
            .await?;
        metrics::counter!(BOOKINGS_EXPIRED_TOTAL).increment(1);
        Ok(expired)
    }

    /// Check the transition table, then compare-and-swap the status.
    async fn transition(
        &self,
        booking: &Booking,
        to: BookingStatus,
        action: &'static str,
        at: Ms,
        payment: Option<PaymentRef>,
    ) -> Result<Booking, EngineError> {
        if !booking.status.can_transition_to(to) {
            return Err(EngineError::InvalidState {
                id: booking.id,
                status: booking.status,
                action,
            });
        }

        let change = StatusChange {
            expected: booking.status,
            new: to,
            at,
            payment,
        };
        let updated = self
            .bookings
            .update_status(booking.id, change)
            .await
            .map_err(|e| match e {
                StoreError::StatusChanged { id, actual } => {
                    tracing::debug!(booking = %id, expected = %booking.status, %actual, "status changed concurrently");
                    EngineError::Conflict(id)
                }
                other => other.into(),
            })?;

        metrics::counter!(BOOKING_TRANSITIONS_TOTAL, "to" => to.as_str()).increment(1);
        tracing::info!(booking = %updated.id, from = %booking.status, to = %to, "booking status changed");
        Ok(updated)
    }
}

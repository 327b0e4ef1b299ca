use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use seatwise_core::clock::Clock;
use seatwise_core::model::{ClassOffering, OfferingStatus};
use seatwise_core::principal::{Principal, Role};
use seatwise_core::store::{OfferingFilter, OfferingUpdateOutcome, ReservationStore};

use crate::authz;
use crate::error::BookingError;
use crate::retry::with_retry;

#[derive(Debug, Clone, Deserialize)]
pub struct NewOffering {
    pub title: String,
    pub description: Option<String>,
    pub subject: Option<String>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub room: Option<String>,
    pub location: Option<String>,
    pub capacity: u32,
    pub price_cents: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OfferingUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub subject: Option<String>,
    pub date: Option<NaiveDate>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub room: Option<String>,
    pub location: Option<String>,
    pub capacity: Option<u32>,
    pub price_cents: Option<i64>,
}

/// An offering plus its derived occupancy.
#[derive(Debug, Clone, Serialize)]
pub struct OfferingSummary {
    #[serde(flatten)]
    pub offering: ClassOffering,
    pub enrolled: u32,
    pub available_spots: u32,
}

/// Thin management layer over class offerings.
///
/// The interesting rules live in `update`: price is frozen once any
/// reservation has been taken against the class (it priced real bookings),
/// and capacity can never drop below current live occupancy.
pub struct OfferingManager {
    store: Arc<dyn ReservationStore>,
    clock: Arc<dyn Clock>,
}

impl OfferingManager {
    pub fn new(store: Arc<dyn ReservationStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn create(
        &self,
        principal: &Principal,
        new: NewOffering,
    ) -> Result<ClassOffering, BookingError> {
        authz::require_role(principal, &[Role::Teacher])?;
        validate_new(&new)?;

        let offering = ClassOffering {
            id: Uuid::new_v4(),
            teacher_id: principal.id,
            title: new.title,
            description: new.description,
            subject: new.subject,
            date: new.date,
            start_time: new.start_time,
            end_time: new.end_time,
            room: new.room,
            location: new.location,
            capacity: new.capacity,
            price_cents: new.price_cents,
            status: OfferingStatus::Scheduled,
            created_at: self.clock.now(),
        };
        let offering =
            with_retry("insert_offering", || self.store.insert_offering(offering.clone())).await?;
        info!(offering_id = %offering.id, teacher_id = %principal.id, "class offering created");
        Ok(offering)
    }

    pub async fn get(&self, id: Uuid) -> Result<OfferingSummary, BookingError> {
        let offering = with_retry("offering", || self.store.offering(id))
            .await?
            .ok_or(BookingError::NotFound("class offering", id))?;
        self.summarize(offering).await
    }

    pub async fn list(&self, filter: &OfferingFilter) -> Result<Vec<OfferingSummary>, BookingError> {
        let offerings = with_retry("list_offerings", || self.store.list_offerings(filter)).await?;
        let mut summaries = Vec::with_capacity(offerings.len());
        for offering in offerings {
            summaries.push(self.summarize(offering).await?);
        }
        Ok(summaries)
    }

    pub async fn update(
        &self,
        principal: &Principal,
        id: Uuid,
        update: OfferingUpdate,
    ) -> Result<ClassOffering, BookingError> {
        authz::require_role(principal, &[Role::Teacher, Role::Admin])?;
        let mut offering = with_retry("offering", || self.store.offering(id))
            .await?
            .ok_or(BookingError::NotFound("class offering", id))?;
        if !authz::may_manage_offering(principal, &offering) {
            return Err(BookingError::Forbidden(
                "only the owning teacher or an admin may edit this class".into(),
            ));
        }

        let mut price_changed = false;
        if let Some(price_cents) = update.price_cents {
            if price_cents != offering.price_cents {
                if price_cents < 0 {
                    return Err(BookingError::Validation("price must not be negative".into()));
                }
                offering.price_cents = price_cents;
                price_changed = true;
            }
        }

        if let Some(capacity) = update.capacity {
            validate_capacity(capacity)?;
            offering.capacity = capacity;
        }

        if let Some(title) = update.title {
            if title.trim().is_empty() {
                return Err(BookingError::Validation("title must not be empty".into()));
            }
            offering.title = title;
        }
        if let Some(description) = update.description {
            offering.description = Some(description);
        }
        if let Some(subject) = update.subject {
            offering.subject = Some(subject);
        }
        if let Some(date) = update.date {
            offering.date = date;
        }
        if let Some(start_time) = update.start_time {
            offering.start_time = start_time;
        }
        if let Some(end_time) = update.end_time {
            offering.end_time = end_time;
        }
        if offering.end_time <= offering.start_time {
            return Err(BookingError::Validation(
                "end time must be after start time".into(),
            ));
        }
        if let Some(room) = update.room {
            offering.room = Some(room);
        }
        if let Some(location) = update.location {
            offering.location = Some(location);
        }

        // The reservation-derived constraints (price freeze, capacity
        // floor) are verified by the store inside the same critical
        // section as the write, so a concurrent admission cannot slip in
        // between check and apply.
        let outcome = with_retry("update_offering_checked", || {
            self.store.update_offering_checked(&offering, price_changed)
        })
        .await?;
        match outcome {
            OfferingUpdateOutcome::Applied(offering) => Ok(offering),
            OfferingUpdateOutcome::PriceLocked => Err(BookingError::Validation(
                "price cannot change once the class has reservations".into(),
            )),
            OfferingUpdateOutcome::CapacityBelowLive { live } => {
                Err(BookingError::Validation(format!(
                    "capacity {} is below the {} seats currently booked",
                    offering.capacity, live
                )))
            }
            OfferingUpdateOutcome::NotFound => Err(BookingError::NotFound("class offering", id)),
        }
    }

    /// Soft-cancel: the offering stops admitting new reservations. Existing
    /// reservations are left alone; cancelling those is a per-reservation
    /// decision.
    pub async fn cancel(
        &self,
        principal: &Principal,
        id: Uuid,
    ) -> Result<ClassOffering, BookingError> {
        authz::require_role(principal, &[Role::Teacher, Role::Admin])?;
        let mut offering = with_retry("offering", || self.store.offering(id))
            .await?
            .ok_or(BookingError::NotFound("class offering", id))?;
        if !authz::may_manage_offering(principal, &offering) {
            return Err(BookingError::Forbidden(
                "only the owning teacher or an admin may cancel this class".into(),
            ));
        }
        // Cancelling twice is a conflict, same as re-cancelling a booking.
        if offering.status == OfferingStatus::Cancelled {
            return Err(BookingError::OfferingCancelled);
        }

        offering.status = OfferingStatus::Cancelled;
        with_retry("update_offering", || self.store.update_offering(&offering)).await?;
        info!(offering_id = %offering.id, "class offering cancelled");
        Ok(offering)
    }

    async fn summarize(&self, offering: ClassOffering) -> Result<OfferingSummary, BookingError> {
        let enrolled = with_retry("live_reservation_count", || {
            self.store.live_reservation_count(offering.id)
        })
        .await?;
        let available_spots = offering.capacity.saturating_sub(enrolled);
        Ok(OfferingSummary {
            offering,
            enrolled,
            available_spots,
        })
    }
}

// The schema stores capacity as a 4-byte integer.
fn validate_capacity(capacity: u32) -> Result<(), BookingError> {
    if capacity == 0 {
        return Err(BookingError::Validation("capacity must be positive".into()));
    }
    if capacity > i32::MAX as u32 {
        return Err(BookingError::Validation("capacity is out of range".into()));
    }
    Ok(())
}

fn validate_new(new: &NewOffering) -> Result<(), BookingError> {
    if new.title.trim().is_empty() {
        return Err(BookingError::Validation("title must not be empty".into()));
    }
    validate_capacity(new.capacity)?;
    if new.price_cents < 0 {
        return Err(BookingError::Validation("price must not be negative".into()));
    }
    if new.end_time <= new.start_time {
        return Err(BookingError::Validation(
            "end time must be after start time".into(),
        ));
    }
    Ok(())
}

use chrono::Duration;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use seatwise_core::clock::Clock;
use seatwise_core::model::{
    ClassOffering, PaymentRecord, Reservation, ReservationEvent,
};
use seatwise_core::principal::{Principal, Role};
use seatwise_core::store::{OfferingFilter, ReservationFilter, ReservationStore};

use crate::error::BookingError;
use crate::guard::CapacityGuard;
use crate::lifecycle::ReservationLifecycle;
use crate::offerings::{NewOffering, OfferingManager, OfferingSummary, OfferingUpdate};
use crate::retry::with_retry;
use crate::settlement::SettlementHandler;
use crate::sweeper::ExpirationSweeper;
use crate::authz;

/// Tunables sourced from configuration.
#[derive(Debug, Clone, Copy)]
pub struct BookingPolicy {
    /// How long a Held reservation keeps its seat before payment is due.
    pub hold_duration: Duration,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            hold_duration: Duration::hours(2),
        }
    }
}

/// A reservation together with its payment record and transition log.
#[derive(Debug, Clone, Serialize)]
pub struct ReservationDetail {
    pub reservation: Reservation,
    pub payment: Option<PaymentRecord>,
    pub events: Vec<ReservationEvent>,
}

/// The reservation engine's single entry point.
///
/// Composes the capacity guard, lifecycle manager, sweeper, and settlement
/// handler over one store and one clock. Everything callers can do goes
/// through here.
pub struct BookingEngine {
    store: Arc<dyn ReservationStore>,
    guard: CapacityGuard,
    lifecycle: ReservationLifecycle,
    sweeper: ExpirationSweeper,
    settlement: SettlementHandler,
    offerings: OfferingManager,
}

impl BookingEngine {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        clock: Arc<dyn Clock>,
        policy: BookingPolicy,
    ) -> Self {
        Self {
            guard: CapacityGuard::new(store.clone(), clock.clone(), policy.hold_duration),
            lifecycle: ReservationLifecycle::new(store.clone(), clock.clone()),
            sweeper: ExpirationSweeper::new(store.clone(), clock.clone()),
            settlement: SettlementHandler::new(store.clone(), clock.clone()),
            offerings: OfferingManager::new(store.clone(), clock),
            store,
        }
    }

    // ---- reservations ----

    /// Book a seat: atomic admission, then a Held reservation with a
    /// payment deadline.
    pub async fn create_reservation(
        &self,
        class_id: Uuid,
        principal: &Principal,
    ) -> Result<Reservation, BookingError> {
        self.guard.try_admit(class_id, principal).await
    }

    /// Apply a captured payment to a Held reservation.
    pub async fn settle_payment(
        &self,
        reservation_id: Uuid,
        amount_cents: i64,
        reference: Option<String>,
        principal: &Principal,
    ) -> Result<Reservation, BookingError> {
        self.settlement
            .settle(reservation_id, amount_cents, reference, principal)
            .await
    }

    pub async fn cancel_reservation(
        &self,
        reservation_id: Uuid,
        principal: &Principal,
    ) -> Result<Reservation, BookingError> {
        self.lifecycle.cancel(reservation_id, principal).await
    }

    /// List reservations. Students are always scoped to their own,
    /// whatever the filter says.
    pub async fn list_reservations(
        &self,
        mut filter: ReservationFilter,
        principal: &Principal,
    ) -> Result<Vec<Reservation>, BookingError> {
        if principal.role == Role::Student {
            filter.student_id = Some(principal.id);
        }
        Ok(with_retry("list_reservations", || self.store.list_reservations(&filter)).await?)
    }

    pub async fn reservation_detail(
        &self,
        reservation_id: Uuid,
        principal: &Principal,
    ) -> Result<ReservationDetail, BookingError> {
        let reservation = with_retry("reservation", || self.store.reservation(reservation_id))
            .await?
            .ok_or(BookingError::NotFound("reservation", reservation_id))?;
        if principal.role == Role::Student && !authz::owns_reservation(principal, &reservation) {
            return Err(BookingError::Forbidden(
                "students may only view their own reservations".into(),
            ));
        }
        let payment =
            with_retry("payment_for", || self.store.payment_for(reservation_id)).await?;
        let events = with_retry("events_for", || self.store.events_for(reservation_id)).await?;
        Ok(ReservationDetail {
            reservation,
            payment,
            events,
        })
    }

    /// One sweep pass over expired holds. Driven by the periodic worker.
    pub async fn sweep_expired(&self) -> Result<usize, BookingError> {
        self.sweeper.release_expired().await
    }

    // ---- class offerings ----

    pub async fn create_offering(
        &self,
        principal: &Principal,
        new: NewOffering,
    ) -> Result<ClassOffering, BookingError> {
        self.offerings.create(principal, new).await
    }

    pub async fn offering(&self, id: Uuid) -> Result<OfferingSummary, BookingError> {
        self.offerings.get(id).await
    }

    pub async fn list_offerings(
        &self,
        filter: &OfferingFilter,
    ) -> Result<Vec<OfferingSummary>, BookingError> {
        self.offerings.list(filter).await
    }

    pub async fn update_offering(
        &self,
        principal: &Principal,
        id: Uuid,
        update: OfferingUpdate,
    ) -> Result<ClassOffering, BookingError> {
        self.offerings.update(principal, id, update).await
    }

    pub async fn cancel_offering(
        &self,
        principal: &Principal,
        id: Uuid,
    ) -> Result<ClassOffering, BookingError> {
        self.offerings.cancel(principal, id).await
    }
}

use chrono::Duration;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use seatwise_core::clock::Clock;
use seatwise_core::model::Reservation;
use seatwise_core::principal::{Principal, Role};
use seatwise_core::store::{AdmissionOutcome, ReservationStore};

use crate::authz;
use crate::error::BookingError;
use crate::retry::with_retry;

/// Decides admission for new seat requests.
///
/// The capacity check and the Held insert are one indivisible store
/// operation; the guard never observes occupancy separately from the
/// insert, so two concurrent requests cannot both see the last free seat.
pub struct CapacityGuard {
    store: Arc<dyn ReservationStore>,
    clock: Arc<dyn Clock>,
    hold: Duration,
}

impl CapacityGuard {
    pub fn new(store: Arc<dyn ReservationStore>, clock: Arc<dyn Clock>, hold: Duration) -> Self {
        Self { store, clock, hold }
    }

    /// Admit a student into a class, creating a Held reservation with its
    /// payment deadline, or reject with the precondition that failed.
    pub async fn try_admit(
        &self,
        class_id: Uuid,
        principal: &Principal,
    ) -> Result<Reservation, BookingError> {
        authz::require_role(principal, &[Role::Student])?;

        let candidate = Reservation::held(principal.id, class_id, self.clock.now(), self.hold);
        let outcome = with_retry("admit_reservation", || {
            self.store.admit_reservation(candidate.clone())
        })
        .await?;

        match outcome {
            AdmissionOutcome::Admitted(reservation) => {
                info!(
                    reservation_id = %reservation.id,
                    class_id = %class_id,
                    student_id = %principal.id,
                    deadline = ?reservation.hold_deadline,
                    "seat held"
                );
                Ok(reservation)
            }
            AdmissionOutcome::Full => Err(BookingError::ClassFull),
            AdmissionOutcome::AlreadyBooked => Err(BookingError::AlreadyBooked),
            AdmissionOutcome::OfferingCancelled => Err(BookingError::OfferingCancelled),
            AdmissionOutcome::UnknownOffering => {
                Err(BookingError::NotFound("class offering", class_id))
            }
        }
    }
}

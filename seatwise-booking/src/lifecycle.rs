use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use seatwise_core::clock::Clock;
use seatwise_core::model::{Reservation, ReservationStatus};
use seatwise_core::principal::Principal;
use seatwise_core::store::{ReservationStore, TransitionChange, TransitionOutcome};

use crate::authz;
use crate::error::BookingError;
use crate::retry::with_retry;

/// Owns the reservation state machine's explicit transitions.
///
/// Held and Confirmed are the only states a cancellation can leave from;
/// Released and Cancelled are terminal. Leaving a live state is itself the
/// seat release: occupancy is recomputed from live rows, so no separate
/// bookkeeping happens here.
pub struct ReservationLifecycle {
    store: Arc<dyn ReservationStore>,
    clock: Arc<dyn Clock>,
}

impl ReservationLifecycle {
    pub fn new(store: Arc<dyn ReservationStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Cancel a reservation on behalf of the owning student, the offering's
    /// teacher, or an admin. A Confirmed reservation's captured payment is
    /// refunded in the same store transaction as the status change.
    pub async fn cancel(
        &self,
        reservation_id: Uuid,
        principal: &Principal,
    ) -> Result<Reservation, BookingError> {
        let mut observed = self.load(reservation_id).await?;

        let offering = with_retry("offering", || self.store.offering(observed.class_id))
            .await?
            .ok_or(BookingError::NotFound("class offering", observed.class_id))?;
        if !authz::may_cancel(principal, &observed, &offering) {
            return Err(BookingError::Forbidden(
                "only the student, the class teacher, or an admin may cancel".into(),
            ));
        }

        // Conditional update keyed on the status we just observed. If a
        // concurrent sweep or settlement wins the race we re-read and
        // re-evaluate rather than overwrite.
        for _ in 0..3 {
            if !observed.status.is_live() {
                return Err(BookingError::InvalidTransition {
                    from: observed.status,
                    to: ReservationStatus::Cancelled,
                });
            }

            let outcome = with_retry("cancel_reservation", || {
                self.store.transition_reservation(
                    reservation_id,
                    observed.status,
                    TransitionChange::Cancel,
                    self.clock.now(),
                )
            })
            .await?;

            match outcome {
                TransitionOutcome::Applied(reservation) => {
                    info!(
                        reservation_id = %reservation.id,
                        from = %observed.status,
                        "reservation cancelled"
                    );
                    return Ok(reservation);
                }
                TransitionOutcome::StatusMismatch(actual) => {
                    observed.status = actual;
                }
                TransitionOutcome::NotFound => {
                    return Err(BookingError::NotFound("reservation", reservation_id))
                }
                TransitionOutcome::DeadlinePassed | TransitionOutcome::AlreadySettled => {
                    // Cancel never produces these; treat as a store defect.
                    return Err(seatwise_core::store::StoreError::Internal(
                        "unexpected transition outcome for cancel".into(),
                    )
                    .into());
                }
            }
        }

        Err(BookingError::InvalidTransition {
            from: observed.status,
            to: ReservationStatus::Cancelled,
        })
    }

    async fn load(&self, reservation_id: Uuid) -> Result<Reservation, BookingError> {
        with_retry("reservation", || self.store.reservation(reservation_id))
            .await?
            .ok_or(BookingError::NotFound("reservation", reservation_id))
    }
}

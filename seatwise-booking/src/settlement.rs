use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use seatwise_core::clock::Clock;
use seatwise_core::model::{PaymentRecord, PaymentStatus, Reservation, ReservationStatus};
use seatwise_core::principal::Principal;
use seatwise_core::store::{ReservationStore, TransitionChange, TransitionOutcome};

use crate::authz;
use crate::error::BookingError;
use crate::retry::with_retry;

/// Applies "payment captured" signals to Held reservations.
///
/// The deadline check here is authoritative: a reservation whose hold has
/// lapsed must not confirm just because the sweeper has not run yet. The
/// check happens inside the same conditional update as the transition, so
/// a settlement and a sweep racing at the boundary resolve to exactly one
/// of Confirmed or Released.
pub struct SettlementHandler {
    store: Arc<dyn ReservationStore>,
    clock: Arc<dyn Clock>,
}

impl SettlementHandler {
    pub fn new(store: Arc<dyn ReservationStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Confirm a Held reservation against a captured payment of
    /// `amount_cents`, which must match the class price exactly.
    pub async fn settle(
        &self,
        reservation_id: Uuid,
        amount_cents: i64,
        reference: Option<String>,
        principal: &Principal,
    ) -> Result<Reservation, BookingError> {
        let reservation = with_retry("reservation", || self.store.reservation(reservation_id))
            .await?
            .ok_or(BookingError::NotFound("reservation", reservation_id))?;

        if !authz::owns_reservation(principal, &reservation) {
            return Err(BookingError::Forbidden(
                "only the reservation's student may settle its payment".into(),
            ));
        }

        let offering = with_retry("offering", || self.store.offering(reservation.class_id))
            .await?
            .ok_or(BookingError::NotFound(
                "class offering",
                reservation.class_id,
            ))?;
        if amount_cents != offering.price_cents {
            return Err(BookingError::PriceMismatch {
                expected_cents: offering.price_cents,
                offered_cents: amount_cents,
            });
        }

        let now = self.clock.now();
        let payment = PaymentRecord {
            id: Uuid::new_v4(),
            reservation_id,
            amount_cents,
            reference,
            status: PaymentStatus::Captured,
            captured_at: now,
        };

        let outcome = with_retry("confirm_reservation", || {
            self.store.transition_reservation(
                reservation_id,
                ReservationStatus::Held,
                TransitionChange::Confirm {
                    payment: payment.clone(),
                },
                now,
            )
        })
        .await?;

        match outcome {
            TransitionOutcome::Applied(confirmed) => {
                info!(
                    reservation_id = %confirmed.id,
                    amount_cents,
                    "payment settled, reservation confirmed"
                );
                Ok(confirmed)
            }
            TransitionOutcome::DeadlinePassed => Err(BookingError::Expired),
            TransitionOutcome::AlreadySettled => Err(BookingError::AlreadySettled),
            TransitionOutcome::NotFound => {
                Err(BookingError::NotFound("reservation", reservation_id))
            }
            // A Confirmed row implies an existing payment; Released means the
            // hold lapsed and the sweeper got there first.
            TransitionOutcome::StatusMismatch(ReservationStatus::Confirmed) => {
                Err(BookingError::AlreadySettled)
            }
            TransitionOutcome::StatusMismatch(ReservationStatus::Released) => {
                Err(BookingError::Expired)
            }
            TransitionOutcome::StatusMismatch(actual) => Err(BookingError::InvalidTransition {
                from: actual,
                to: ReservationStatus::Confirmed,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use seatwise_core::clock::ManualClock;
    use seatwise_core::model::{ClassOffering, OfferingStatus};
    use seatwise_core::principal::Role;
    use seatwise_core::store::AdmissionOutcome;
    use seatwise_store::InMemoryStore;

    struct Fixture {
        store: Arc<InMemoryStore>,
        clock: Arc<ManualClock>,
        handler: SettlementHandler,
        reservation: Reservation,
        student: Principal,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let class = store
            .insert_offering(ClassOffering {
                id: Uuid::new_v4(),
                teacher_id: Uuid::new_v4(),
                title: "Intro to sailing".into(),
                description: None,
                subject: None,
                date: Utc::now().date_naive(),
                start_time: chrono::NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
                end_time: chrono::NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                room: None,
                location: Some("Marina".into()),
                capacity: 6,
                price_cents: 5000,
                status: OfferingStatus::Scheduled,
                created_at: clock.now(),
            })
            .await
            .unwrap();

        let student = Principal::new(Uuid::new_v4(), Role::Student);
        let candidate = Reservation::held(student.id, class.id, clock.now(), Duration::hours(2));
        let reservation = match store.admit_reservation(candidate).await.unwrap() {
            AdmissionOutcome::Admitted(r) => r,
            other => panic!("admission failed: {:?}", other),
        };

        Fixture {
            store: store.clone(),
            clock: clock.clone(),
            handler: SettlementHandler::new(store, clock),
            reservation,
            student,
        }
    }

    #[tokio::test]
    async fn test_settle_confirms_and_captures() {
        let f = fixture().await;
        let confirmed = f
            .handler
            .settle(f.reservation.id, 5000, Some("txn-1".into()), &f.student)
            .await
            .unwrap();
        assert_eq!(confirmed.status, ReservationStatus::Confirmed);
        assert!(confirmed.hold_deadline.is_none());
        assert_eq!(confirmed.confirmed_at, Some(f.clock.now()));

        let payment = f.store.payment_for(f.reservation.id).await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Captured);
        assert_eq!(payment.amount_cents, 5000);
        assert_eq!(payment.reference.as_deref(), Some("txn-1"));
    }

    #[tokio::test]
    async fn test_settle_rejects_wrong_amount() {
        let f = fixture().await;
        let err = f
            .handler
            .settle(f.reservation.id, 4999, None, &f.student)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BookingError::PriceMismatch {
                expected_cents: 5000,
                offered_cents: 4999,
            }
        ));
    }

    #[tokio::test]
    async fn test_settle_after_deadline_is_expired_even_without_sweep() {
        let f = fixture().await;
        f.clock.advance(Duration::hours(2) + Duration::seconds(1));
        let err = f
            .handler
            .settle(f.reservation.id, 5000, None, &f.student)
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Expired));
        // The reservation itself is untouched; the sweeper will release it.
        let r = f.store.reservation(f.reservation.id).await.unwrap().unwrap();
        assert_eq!(r.status, ReservationStatus::Held);
    }

    #[tokio::test]
    async fn test_settle_at_exact_deadline_is_expired() {
        let f = fixture().await;
        // now == hold_deadline: the contract is strictly now < deadline.
        f.clock.advance(Duration::hours(2));
        let err = f
            .handler
            .settle(f.reservation.id, 5000, None, &f.student)
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Expired));
    }

    #[tokio::test]
    async fn test_double_settle_rejected() {
        let f = fixture().await;
        f.handler
            .settle(f.reservation.id, 5000, None, &f.student)
            .await
            .unwrap();
        let err = f
            .handler
            .settle(f.reservation.id, 5000, None, &f.student)
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::AlreadySettled));
    }

    #[tokio::test]
    async fn test_only_owner_or_admin_settles() {
        let f = fixture().await;
        let stranger = Principal::new(Uuid::new_v4(), Role::Student);
        assert!(matches!(
            f.handler.settle(f.reservation.id, 5000, None, &stranger).await,
            Err(BookingError::Forbidden(_))
        ));

        let admin = Principal::new(Uuid::new_v4(), Role::Admin);
        let confirmed = f
            .handler
            .settle(f.reservation.id, 5000, None, &admin)
            .await
            .unwrap();
        assert_eq!(confirmed.status, ReservationStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_settle_unknown_reservation() {
        let f = fixture().await;
        assert!(matches!(
            f.handler.settle(Uuid::new_v4(), 5000, None, &f.student).await,
            Err(BookingError::NotFound("reservation", _))
        ));
    }
}

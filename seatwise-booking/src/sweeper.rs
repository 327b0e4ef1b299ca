use std::sync::Arc;
use tracing::{debug, info, warn};

use seatwise_core::clock::Clock;
use seatwise_core::model::ReservationStatus;
use seatwise_core::store::{ReservationStore, TransitionChange, TransitionOutcome};

use crate::error::BookingError;
use crate::retry::with_retry;

/// Releases Held reservations whose payment deadline has passed.
///
/// Each release is an independent conditional update keyed on the row still
/// being Held. Losing a race to a concurrent cancellation or settlement is
/// an expected outcome, not an error, and one bad row never blocks the rest
/// of the batch.
pub struct ExpirationSweeper {
    store: Arc<dyn ReservationStore>,
    clock: Arc<dyn Clock>,
}

impl ExpirationSweeper {
    pub fn new(store: Arc<dyn ReservationStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// One sweep pass. Returns how many reservations were released.
    pub async fn release_expired(&self) -> Result<usize, BookingError> {
        let now = self.clock.now();
        let due = with_retry("expired_held", || self.store.expired_held(now)).await?;
        if due.is_empty() {
            return Ok(0);
        }

        let mut released = 0;
        for id in due {
            let outcome = with_retry("release_reservation", || {
                self.store.transition_reservation(
                    id,
                    ReservationStatus::Held,
                    TransitionChange::Release,
                    now,
                )
            })
            .await;

            match outcome {
                Ok(TransitionOutcome::Applied(_)) => {
                    info!(reservation_id = %id, "expired hold released");
                    released += 1;
                }
                Ok(TransitionOutcome::StatusMismatch(actual)) => {
                    debug!(
                        reservation_id = %id,
                        status = %actual,
                        "hold already left Held, skipping"
                    );
                }
                Ok(TransitionOutcome::NotFound) => {
                    debug!(reservation_id = %id, "reservation vanished mid-sweep, skipping");
                }
                Ok(other) => {
                    warn!(reservation_id = %id, outcome = ?other, "unexpected release outcome");
                }
                Err(e) => {
                    // Skip and continue; the next sweep will pick it up.
                    warn!(reservation_id = %id, error = %e, "release failed, skipping");
                }
            }
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use seatwise_core::clock::ManualClock;
    use seatwise_core::model::{ClassOffering, OfferingStatus, Reservation};
    use seatwise_core::store::AdmissionOutcome;
    use seatwise_store::InMemoryStore;
    use uuid::Uuid;

    async fn seed_class(store: &InMemoryStore, capacity: u32) -> ClassOffering {
        store
            .insert_offering(ClassOffering {
                id: Uuid::new_v4(),
                teacher_id: Uuid::new_v4(),
                title: "Pottery".into(),
                description: None,
                subject: None,
                date: Utc::now().date_naive(),
                start_time: chrono::NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
                end_time: chrono::NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
                room: None,
                location: None,
                capacity,
                price_cents: 3000,
                status: OfferingStatus::Scheduled,
                created_at: Utc::now(),
            })
            .await
            .unwrap()
    }

    async fn hold(store: &InMemoryStore, class_id: Uuid, clock: &ManualClock) -> Reservation {
        let candidate =
            Reservation::held(Uuid::new_v4(), class_id, clock.now(), Duration::hours(2));
        match store.admit_reservation(candidate).await.unwrap() {
            AdmissionOutcome::Admitted(r) => r,
            other => panic!("admission failed: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sweep_releases_only_expired_holds() {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let class = seed_class(&store, 3).await;

        let stale = hold(&store, class.id, &clock).await;
        clock.advance(Duration::hours(1));
        let fresh = hold(&store, class.id, &clock).await;

        // Move exactly to the stale hold's deadline: deadline <= now expires.
        clock.advance(Duration::hours(1));
        let sweeper = ExpirationSweeper::new(store.clone(), clock.clone());
        assert_eq!(sweeper.release_expired().await.unwrap(), 1);

        let stale = store.reservation(stale.id).await.unwrap().unwrap();
        let fresh = store.reservation(fresh.id).await.unwrap().unwrap();
        assert_eq!(stale.status, ReservationStatus::Released);
        assert!(stale.hold_deadline.is_none());
        assert_eq!(fresh.status, ReservationStatus::Held);
    }

    #[tokio::test]
    async fn test_sweep_skips_rows_moved_out_of_held() {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let class = seed_class(&store, 2).await;

        let expired_then_cancelled = hold(&store, class.id, &clock).await;
        let expired = hold(&store, class.id, &clock).await;
        clock.advance(Duration::hours(3));

        // A concurrent actor cancels one row between the scan and the sweep.
        store
            .transition_reservation(
                expired_then_cancelled.id,
                ReservationStatus::Held,
                TransitionChange::Cancel,
                clock.now(),
            )
            .await
            .unwrap();

        let sweeper = ExpirationSweeper::new(store.clone(), clock.clone());
        assert_eq!(sweeper.release_expired().await.unwrap(), 1);

        let cancelled = store
            .reservation(expired_then_cancelled.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cancelled.status, ReservationStatus::Cancelled);
        let released = store.reservation(expired.id).await.unwrap().unwrap();
        assert_eq!(released.status, ReservationStatus::Released);
    }

    #[tokio::test]
    async fn test_empty_sweep() {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let sweeper = ExpirationSweeper::new(store, clock);
        assert_eq!(sweeper.release_expired().await.unwrap(), 0);
    }

    /// Store wrapper that reports one reservation's releases as a
    /// transient outage while passing everything else through.
    struct OutageOnOneRelease {
        inner: Arc<InMemoryStore>,
        poisoned: Uuid,
    }

    #[async_trait::async_trait]
    impl ReservationStore for OutageOnOneRelease {
        async fn insert_offering(
            &self,
            offering: ClassOffering,
        ) -> seatwise_core::store::StoreResult<ClassOffering> {
            self.inner.insert_offering(offering).await
        }

        async fn offering(
            &self,
            id: Uuid,
        ) -> seatwise_core::store::StoreResult<Option<ClassOffering>> {
            self.inner.offering(id).await
        }

        async fn list_offerings(
            &self,
            filter: &seatwise_core::store::OfferingFilter,
        ) -> seatwise_core::store::StoreResult<Vec<ClassOffering>> {
            self.inner.list_offerings(filter).await
        }

        async fn update_offering(
            &self,
            offering: &ClassOffering,
        ) -> seatwise_core::store::StoreResult<()> {
            self.inner.update_offering(offering).await
        }

        async fn update_offering_checked(
            &self,
            offering: &ClassOffering,
            price_changed: bool,
        ) -> seatwise_core::store::StoreResult<seatwise_core::store::OfferingUpdateOutcome>
        {
            self.inner.update_offering_checked(offering, price_changed).await
        }

        async fn reservation(
            &self,
            id: Uuid,
        ) -> seatwise_core::store::StoreResult<Option<Reservation>> {
            self.inner.reservation(id).await
        }

        async fn list_reservations(
            &self,
            filter: &seatwise_core::store::ReservationFilter,
        ) -> seatwise_core::store::StoreResult<Vec<Reservation>> {
            self.inner.list_reservations(filter).await
        }

        async fn live_reservation_count(
            &self,
            class_id: Uuid,
        ) -> seatwise_core::store::StoreResult<u32> {
            self.inner.live_reservation_count(class_id).await
        }

        async fn admit_reservation(
            &self,
            candidate: Reservation,
        ) -> seatwise_core::store::StoreResult<AdmissionOutcome> {
            self.inner.admit_reservation(candidate).await
        }

        async fn transition_reservation(
            &self,
            id: Uuid,
            expected: ReservationStatus,
            change: TransitionChange,
            now: chrono::DateTime<chrono::Utc>,
        ) -> seatwise_core::store::StoreResult<TransitionOutcome> {
            if id == self.poisoned {
                return Err(seatwise_core::store::StoreError::Unavailable(
                    "connection reset".into(),
                ));
            }
            self.inner
                .transition_reservation(id, expected, change, now)
                .await
        }

        async fn payment_for(
            &self,
            reservation_id: Uuid,
        ) -> seatwise_core::store::StoreResult<Option<seatwise_core::model::PaymentRecord>>
        {
            self.inner.payment_for(reservation_id).await
        }

        async fn expired_held(
            &self,
            now: chrono::DateTime<chrono::Utc>,
        ) -> seatwise_core::store::StoreResult<Vec<Uuid>> {
            self.inner.expired_held(now).await
        }

        async fn events_for(
            &self,
            reservation_id: Uuid,
        ) -> seatwise_core::store::StoreResult<Vec<seatwise_core::model::ReservationEvent>>
        {
            self.inner.events_for(reservation_id).await
        }
    }

    #[tokio::test]
    async fn test_store_failure_on_one_release_does_not_abort_the_batch() {
        let inner = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let class = seed_class(&inner, 3).await;

        let first = hold(&inner, class.id, &clock).await;
        let second = hold(&inner, class.id, &clock).await;
        let third = hold(&inner, class.id, &clock).await;
        clock.advance(Duration::hours(3));

        let store = Arc::new(OutageOnOneRelease {
            inner: inner.clone(),
            poisoned: second.id,
        });
        let sweeper = ExpirationSweeper::new(store, clock.clone());

        // The outage exhausts the retry budget for one row; the rest of
        // the batch is still released.
        assert_eq!(sweeper.release_expired().await.unwrap(), 2);
        let stuck = inner.reservation(second.id).await.unwrap().unwrap();
        assert_eq!(stuck.status, ReservationStatus::Held);
        for id in [first.id, third.id] {
            let released = inner.reservation(id).await.unwrap().unwrap();
            assert_eq!(released.status, ReservationStatus::Released);
        }

        // The next pass picks the stuck row up once the store recovers.
        let sweeper = ExpirationSweeper::new(inner.clone(), clock);
        assert_eq!(sweeper.release_expired().await.unwrap(), 1);
    }
}

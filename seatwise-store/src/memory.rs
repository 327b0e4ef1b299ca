use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

use seatwise_core::model::{
    ClassOffering, OfferingStatus, PaymentRecord, PaymentStatus, Reservation, ReservationEvent,
    ReservationStatus,
};
use seatwise_core::store::{
    AdmissionOutcome, OfferingFilter, OfferingUpdateOutcome, ReservationFilter,
    ReservationStore, StoreError, StoreResult, TransitionChange, TransitionOutcome,
};

#[derive(Debug, Default)]
struct Inner {
    offerings: HashMap<Uuid, ClassOffering>,
    reservations: HashMap<Uuid, Reservation>,
    /// Keyed by reservation id (1:0..1 ownership).
    payments: HashMap<Uuid, PaymentRecord>,
    events: Vec<ReservationEvent>,
}

impl Inner {
    fn live_count(&self, class_id: Uuid) -> u32 {
        self.reservations
            .values()
            .filter(|r| r.class_id == class_id && r.is_live())
            .count() as u32
    }

    fn record_event(
        &mut self,
        reservation_id: Uuid,
        prev: Option<ReservationStatus>,
        next: ReservationStatus,
        at: DateTime<Utc>,
    ) {
        self.events.push(ReservationEvent {
            reservation_id,
            prev_status: prev,
            next_status: next,
            occurred_at: at,
        });
    }
}

/// In-memory store backed by one async mutex.
///
/// A single lock serializes every operation, which trivially satisfies the
/// linearizability the admission path needs. Used by tests and single-node
/// deployments; the PostgreSQL store covers everything else.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    fail_next: AtomicU32,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` store operations fail as transient. Test hook for
    /// the engine's retry policy.
    pub fn inject_unavailable(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    fn gate(&self) -> StoreResult<()> {
        let remaining = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if remaining {
            Err(StoreError::Unavailable("injected fault".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ReservationStore for InMemoryStore {
    async fn insert_offering(&self, offering: ClassOffering) -> StoreResult<ClassOffering> {
        self.gate()?;
        let mut inner = self.inner.lock().await;
        inner.offerings.insert(offering.id, offering.clone());
        Ok(offering)
    }

    async fn offering(&self, id: Uuid) -> StoreResult<Option<ClassOffering>> {
        self.gate()?;
        let inner = self.inner.lock().await;
        Ok(inner.offerings.get(&id).cloned())
    }

    async fn list_offerings(&self, filter: &OfferingFilter) -> StoreResult<Vec<ClassOffering>> {
        self.gate()?;
        let inner = self.inner.lock().await;
        let mut offerings: Vec<ClassOffering> = inner
            .offerings
            .values()
            .filter(|o| filter.teacher_id.is_none_or(|t| o.teacher_id == t))
            .filter(|o| filter.date.is_none_or(|d| o.date == d))
            .filter(|o| filter.status.is_none_or(|s| o.status == s))
            .cloned()
            .collect();
        offerings.sort_by(|a, b| (a.date, a.start_time).cmp(&(b.date, b.start_time)));
        Ok(offerings)
    }

    async fn update_offering(&self, offering: &ClassOffering) -> StoreResult<()> {
        self.gate()?;
        let mut inner = self.inner.lock().await;
        if !inner.offerings.contains_key(&offering.id) {
            return Err(StoreError::Internal(format!(
                "update of unknown offering {}",
                offering.id
            )));
        }
        inner.offerings.insert(offering.id, offering.clone());
        Ok(())
    }

    async fn update_offering_checked(
        &self,
        offering: &ClassOffering,
        price_changed: bool,
    ) -> StoreResult<OfferingUpdateOutcome> {
        self.gate()?;
        let mut inner = self.inner.lock().await;
        if !inner.offerings.contains_key(&offering.id) {
            return Ok(OfferingUpdateOutcome::NotFound);
        }
        if price_changed {
            let booked = inner
                .reservations
                .values()
                .any(|r| r.class_id == offering.id);
            if booked {
                return Ok(OfferingUpdateOutcome::PriceLocked);
            }
        }
        let live = inner.live_count(offering.id);
        if offering.capacity < live {
            return Ok(OfferingUpdateOutcome::CapacityBelowLive { live });
        }
        inner.offerings.insert(offering.id, offering.clone());
        Ok(OfferingUpdateOutcome::Applied(offering.clone()))
    }

    async fn reservation(&self, id: Uuid) -> StoreResult<Option<Reservation>> {
        self.gate()?;
        let inner = self.inner.lock().await;
        Ok(inner.reservations.get(&id).cloned())
    }

    async fn list_reservations(
        &self,
        filter: &ReservationFilter,
    ) -> StoreResult<Vec<Reservation>> {
        self.gate()?;
        let inner = self.inner.lock().await;
        let mut reservations: Vec<Reservation> = inner
            .reservations
            .values()
            .filter(|r| filter.student_id.is_none_or(|s| r.student_id == s))
            .filter(|r| filter.class_id.is_none_or(|c| r.class_id == c))
            .filter(|r| filter.status.is_none_or(|s| r.status == s))
            .cloned()
            .collect();
        reservations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(reservations)
    }

    async fn live_reservation_count(&self, class_id: Uuid) -> StoreResult<u32> {
        self.gate()?;
        let inner = self.inner.lock().await;
        Ok(inner.live_count(class_id))
    }

    async fn admit_reservation(&self, candidate: Reservation) -> StoreResult<AdmissionOutcome> {
        self.gate()?;
        let mut inner = self.inner.lock().await;

        let offering = match inner.offerings.get(&candidate.class_id) {
            Some(o) => o,
            None => return Ok(AdmissionOutcome::UnknownOffering),
        };
        if offering.status == OfferingStatus::Cancelled {
            return Ok(AdmissionOutcome::OfferingCancelled);
        }
        let capacity = offering.capacity;

        let duplicate = inner.reservations.values().any(|r| {
            r.class_id == candidate.class_id && r.student_id == candidate.student_id && r.is_live()
        });
        if duplicate {
            return Ok(AdmissionOutcome::AlreadyBooked);
        }

        if inner.live_count(candidate.class_id) >= capacity {
            return Ok(AdmissionOutcome::Full);
        }

        inner.reservations.insert(candidate.id, candidate.clone());
        inner.record_event(
            candidate.id,
            None,
            ReservationStatus::Held,
            candidate.created_at,
        );
        Ok(AdmissionOutcome::Admitted(candidate))
    }

    async fn transition_reservation(
        &self,
        id: Uuid,
        expected: ReservationStatus,
        change: TransitionChange,
        now: DateTime<Utc>,
    ) -> StoreResult<TransitionOutcome> {
        self.gate()?;
        let mut inner = self.inner.lock().await;

        let current = match inner.reservations.get(&id) {
            Some(r) => r.clone(),
            None => return Ok(TransitionOutcome::NotFound),
        };
        if current.status != expected {
            return Ok(TransitionOutcome::StatusMismatch(current.status));
        }

        let updated = match change {
            TransitionChange::Confirm { payment } => {
                match current.hold_deadline {
                    Some(deadline) if now < deadline => {}
                    _ => return Ok(TransitionOutcome::DeadlinePassed),
                }
                if inner.payments.contains_key(&id) {
                    return Ok(TransitionOutcome::AlreadySettled);
                }
                inner.payments.insert(id, payment);
                let mut r = current.clone();
                r.status = ReservationStatus::Confirmed;
                r.confirmed_at = Some(now);
                r.hold_deadline = None;
                r
            }
            TransitionChange::Release => {
                let mut r = current.clone();
                r.status = ReservationStatus::Released;
                r.hold_deadline = None;
                r
            }
            TransitionChange::Cancel => {
                if let Some(payment) = inner.payments.get_mut(&id) {
                    if payment.status == PaymentStatus::Captured {
                        payment.status = PaymentStatus::Refunded;
                    }
                }
                let mut r = current.clone();
                r.status = ReservationStatus::Cancelled;
                r.hold_deadline = None;
                r
            }
        };

        inner.reservations.insert(id, updated.clone());
        inner.record_event(id, Some(current.status), updated.status, now);
        Ok(TransitionOutcome::Applied(updated))
    }

    async fn payment_for(&self, reservation_id: Uuid) -> StoreResult<Option<PaymentRecord>> {
        self.gate()?;
        let inner = self.inner.lock().await;
        Ok(inner.payments.get(&reservation_id).cloned())
    }

    async fn expired_held(&self, now: DateTime<Utc>) -> StoreResult<Vec<Uuid>> {
        self.gate()?;
        let inner = self.inner.lock().await;
        Ok(inner
            .reservations
            .values()
            .filter(|r| {
                r.status == ReservationStatus::Held
                    && r.hold_deadline.is_some_and(|d| d <= now)
            })
            .map(|r| r.id)
            .collect())
    }

    async fn events_for(&self, reservation_id: Uuid) -> StoreResult<Vec<ReservationEvent>> {
        self.gate()?;
        let inner = self.inner.lock().await;
        Ok(inner
            .events
            .iter()
            .filter(|e| e.reservation_id == reservation_id)
            .cloned()
            .collect())
    }
}

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::model::{
    ClassOffering, OfferingStatus, PaymentRecord, Reservation, ReservationEvent,
    ReservationStatus,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Transient failure (commit contention, lost connection). Callers may
    /// retry with backoff before surfacing it.
    #[error("store temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("store failure: {0}")]
    Internal(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Default)]
pub struct OfferingFilter {
    pub teacher_id: Option<Uuid>,
    pub date: Option<NaiveDate>,
    pub status: Option<OfferingStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct ReservationFilter {
    pub student_id: Option<Uuid>,
    pub class_id: Option<Uuid>,
    pub status: Option<ReservationStatus>,
}

/// Result of the policy-guarded offering update.
#[derive(Debug)]
pub enum OfferingUpdateOutcome {
    Applied(ClassOffering),
    /// The new capacity would drop below the current live reservation count.
    CapacityBelowLive { live: u32 },
    /// A price change was requested but reservations already exist.
    PriceLocked,
    NotFound,
}

/// Result of the atomic admission check-and-insert.
#[derive(Debug)]
pub enum AdmissionOutcome {
    Admitted(Reservation),
    /// Live reservation count already at capacity.
    Full,
    /// The student already has a live reservation for this class.
    AlreadyBooked,
    OfferingCancelled,
    UnknownOffering,
}

/// The write half of a conditional status transition.
#[derive(Debug, Clone)]
pub enum TransitionChange {
    /// Held → Confirmed. Checked against the hold deadline and any existing
    /// payment record inside the same critical section; captures `payment`
    /// on success.
    Confirm { payment: PaymentRecord },
    /// Held → Released, no payment side effects.
    Release,
    /// Held/Confirmed → Cancelled. A Captured payment record, if present,
    /// is marked Refunded in the same unit.
    Cancel,
}

#[derive(Debug)]
pub enum TransitionOutcome {
    Applied(Reservation),
    /// The reservation's current status did not match the expected one; a
    /// concurrent actor won the race. Carries the status actually observed.
    StatusMismatch(ReservationStatus),
    /// Confirm only: `now` was at or past the hold deadline.
    DeadlinePassed,
    /// Confirm only: a payment record already exists.
    AlreadySettled,
    NotFound,
}

/// Transactional store for the booking entities.
///
/// The two mutating operations are the concurrency seams: `admit_reservation`
/// must serialize the capacity check with the insert per class id, and
/// `transition_reservation` is a compare-and-swap keyed on the current
/// status. Everything else is plain reads and writes.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn insert_offering(&self, offering: ClassOffering) -> StoreResult<ClassOffering>;

    async fn offering(&self, id: Uuid) -> StoreResult<Option<ClassOffering>>;

    async fn list_offerings(&self, filter: &OfferingFilter) -> StoreResult<Vec<ClassOffering>>;

    /// Unconditional offering write, for changes with no booking-derived
    /// preconditions (status flips). Edits that depend on reservation
    /// counts go through `update_offering_checked`.
    async fn update_offering(&self, offering: &ClassOffering) -> StoreResult<()>;

    /// Policy-guarded offering write. The booking-derived constraints are
    /// re-checked inside the same critical section as the write, serialized
    /// against `admit_reservation` for the class: a price change is
    /// rejected once any reservation exists, and the new capacity may
    /// never drop below the current live count.
    async fn update_offering_checked(
        &self,
        offering: &ClassOffering,
        price_changed: bool,
    ) -> StoreResult<OfferingUpdateOutcome>;

    async fn reservation(&self, id: Uuid) -> StoreResult<Option<Reservation>>;

    async fn list_reservations(&self, filter: &ReservationFilter)
        -> StoreResult<Vec<Reservation>>;

    /// Count of reservations in {Held, Confirmed} for a class. Derived
    /// occupancy; there is no stored seat counter anywhere.
    async fn live_reservation_count(&self, class_id: Uuid) -> StoreResult<u32>;

    /// Atomically: resolve the offering, count live reservations, check for
    /// a duplicate live booking by the same student, and insert the Held
    /// candidate. Two concurrent calls for the last seat must not both
    /// succeed.
    async fn admit_reservation(&self, candidate: Reservation) -> StoreResult<AdmissionOutcome>;

    /// Conditional transition: applies `change` only if the reservation's
    /// current status equals `expected`. `now` is evaluated inside the same
    /// critical section for the Confirm deadline check.
    async fn transition_reservation(
        &self,
        id: Uuid,
        expected: ReservationStatus,
        change: TransitionChange,
        now: DateTime<Utc>,
    ) -> StoreResult<TransitionOutcome>;

    async fn payment_for(&self, reservation_id: Uuid) -> StoreResult<Option<PaymentRecord>>;

    /// Ids of reservations still Held whose deadline is at or before `now`.
    async fn expired_held(&self, now: DateTime<Utc>) -> StoreResult<Vec<Uuid>>;

    /// Append-only transition log for one reservation, in order.
    async fn events_for(&self, reservation_id: Uuid) -> StoreResult<Vec<ReservationEvent>>;
}

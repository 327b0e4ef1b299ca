use seatwise_core::model::ReservationStatus;
use seatwise_core::store::StoreError;
use uuid::Uuid;

/// Every business-rule rejection the engine can hand back. These are
/// values, not faults: contention outcomes (ClassFull, AlreadyBooked,
/// AlreadySettled) are expected results, and only `Store` marks a genuine
/// infrastructure problem that survived the retry budget.
#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("class is full")]
    ClassFull,

    #[error("student already has a live reservation for this class")]
    AlreadyBooked,

    #[error("class offering has been cancelled")]
    OfferingCancelled,

    #[error("{0} not found: {1}")]
    NotFound(&'static str, Uuid),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },

    #[error("hold deadline has passed")]
    Expired,

    #[error("a payment was already settled for this reservation")]
    AlreadySettled,

    #[error("amount {offered_cents} does not match the class price {expected_cents}")]
    PriceMismatch {
        expected_cents: i64,
        offered_cents: i64,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

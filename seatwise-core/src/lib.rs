pub mod clock;
pub mod model;
pub mod principal;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use model::{
    ClassOffering, OfferingStatus, PaymentRecord, PaymentStatus, Reservation, ReservationEvent,
    ReservationStatus,
};
pub use principal::{Principal, Role};
pub use store::{
    AdmissionOutcome, OfferingFilter, OfferingUpdateOutcome, ReservationFilter,
    ReservationStore, StoreError, StoreResult, TransitionChange, TransitionOutcome,
};

pub mod authz;
pub mod engine;
pub mod error;
pub mod guard;
pub mod lifecycle;
pub mod offerings;
pub mod settlement;
pub mod sweeper;

mod retry;

pub use engine::{BookingEngine, BookingPolicy, ReservationDetail};
pub use error::BookingError;
pub use guard::CapacityGuard;
pub use lifecycle::ReservationLifecycle;
pub use offerings::{NewOffering, OfferingSummary, OfferingUpdate};
pub use settlement::SettlementHandler;
pub use sweeper::ExpirationSweeper;

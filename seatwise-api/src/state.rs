use std::sync::Arc;

use seatwise_booking::BookingEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<BookingEngine>,
}

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use seatwise_booking::BookingEngine;

/// Periodic expiration sweep. The engine's own deadline checks stay
/// authoritative; this loop just makes sure no expired hold keeps its seat
/// for longer than one interval.
pub async fn run_sweeper(engine: Arc<BookingEngine>, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_secs = every.as_secs(), "expiration sweeper started");

    loop {
        ticker.tick().await;
        match engine.sweep_expired().await {
            Ok(0) => {}
            Ok(released) => info!(released, "sweep released expired holds"),
            // Next tick retries; a failed sweep never kills the loop.
            Err(e) => error!("sweep failed: {}", e),
        }
    }
}

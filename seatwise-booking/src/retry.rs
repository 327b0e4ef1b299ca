use seatwise_core::store::{StoreError, StoreResult};
use std::future::Future;
use std::time::Duration;

const MAX_ATTEMPTS: u32 = 3;
const BASE_DELAY: Duration = Duration::from_millis(25);

/// Retry a store call on transient failures with doubling backoff. Anything
/// that still fails after the budget is surfaced; business outcomes pass
/// through untouched.
pub(crate) async fn with_retry<T, F, Fut>(op: &str, mut call: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut delay = BASE_DELAY;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match call().await {
            Err(StoreError::Unavailable(reason)) if attempt < MAX_ATTEMPTS => {
                tracing::warn!(op, attempt, %reason, "transient store failure, retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            other => return other,
        }
    }
}

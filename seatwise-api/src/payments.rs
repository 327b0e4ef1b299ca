use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use seatwise_core::model::Reservation;

use crate::auth::AuthPrincipal;
use crate::error::ApiError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/payments", post(create_payment))
}

/// The "payment captured" signal from the gateway integration: an amount
/// and an opaque provider reference. No card data comes anywhere near here.
#[derive(Debug, Deserialize)]
struct CreatePaymentRequest {
    booking_id: Uuid,
    amount_cents: i64,
    reference: Option<String>,
}

async fn create_payment(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Json(req): Json<CreatePaymentRequest>,
) -> Result<(axum::http::StatusCode, Json<Reservation>), ApiError> {
    let reservation = state
        .engine
        .settle_payment(req.booking_id, req.amount_cents, req.reference, &principal)
        .await?;
    Ok((axum::http::StatusCode::CREATED, Json(reservation)))
}

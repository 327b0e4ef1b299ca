use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use seatwise_booking::ReservationDetail;
use seatwise_core::model::{Reservation, ReservationStatus};
use seatwise_core::store::ReservationFilter;

use crate::auth::AuthPrincipal;
use crate::error::ApiError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/bookings", get(list_bookings).post(create_booking))
        .route("/v1/bookings/{id}", get(get_booking))
        .route("/v1/bookings/{id}/cancel", post(cancel_booking))
}

#[derive(Debug, Deserialize)]
struct CreateBookingRequest {
    class_id: Uuid,
}

async fn create_booking(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Json(req): Json<CreateBookingRequest>,
) -> Result<(axum::http::StatusCode, Json<Reservation>), ApiError> {
    let reservation = state
        .engine
        .create_reservation(req.class_id, &principal)
        .await?;
    Ok((axum::http::StatusCode::CREATED, Json(reservation)))
}

#[derive(Debug, Deserialize)]
struct ListBookingsQuery {
    student_id: Option<Uuid>,
    class_id: Option<Uuid>,
    status: Option<ReservationStatus>,
}

async fn list_bookings(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Query(query): Query<ListBookingsQuery>,
) -> Result<Json<Vec<Reservation>>, ApiError> {
    let filter = ReservationFilter {
        student_id: query.student_id,
        class_id: query.class_id,
        status: query.status,
    };
    Ok(Json(state.engine.list_reservations(filter, &principal).await?))
}

async fn get_booking(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<Uuid>,
) -> Result<Json<ReservationDetail>, ApiError> {
    Ok(Json(state.engine.reservation_detail(id, &principal).await?))
}

async fn cancel_booking(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<Uuid>,
) -> Result<Json<Reservation>, ApiError> {
    Ok(Json(state.engine.cancel_reservation(id, &principal).await?))
}

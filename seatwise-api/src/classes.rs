use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use seatwise_booking::{NewOffering, OfferingSummary, OfferingUpdate};
use seatwise_core::model::{ClassOffering, OfferingStatus};
use seatwise_core::store::OfferingFilter;

use crate::auth::AuthPrincipal;
use crate::error::ApiError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/classes", get(list_classes).post(create_class))
        .route(
            "/v1/classes/{id}",
            get(get_class).patch(update_class).delete(cancel_class),
        )
}

#[derive(Debug, Deserialize)]
struct ListClassesQuery {
    date: Option<NaiveDate>,
    teacher_id: Option<Uuid>,
    status: Option<OfferingStatus>,
}

async fn list_classes(
    State(state): State<AppState>,
    Query(query): Query<ListClassesQuery>,
) -> Result<Json<Vec<OfferingSummary>>, ApiError> {
    let filter = OfferingFilter {
        teacher_id: query.teacher_id,
        date: query.date,
        status: query.status,
    };
    Ok(Json(state.engine.list_offerings(&filter).await?))
}

async fn get_class(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<OfferingSummary>, ApiError> {
    Ok(Json(state.engine.offering(id).await?))
}

async fn create_class(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Json(req): Json<NewOffering>,
) -> Result<(axum::http::StatusCode, Json<ClassOffering>), ApiError> {
    let offering = state.engine.create_offering(&principal, req).await?;
    Ok((axum::http::StatusCode::CREATED, Json(offering)))
}

async fn update_class(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<Uuid>,
    Json(req): Json<OfferingUpdate>,
) -> Result<Json<ClassOffering>, ApiError> {
    Ok(Json(state.engine.update_offering(&principal, id, req).await?))
}

async fn cancel_class(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<Uuid>,
) -> Result<Json<ClassOffering>, ApiError> {
    Ok(Json(state.engine.cancel_offering(&principal, id).await?))
}

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use seatwise_booking::BookingError;
use seatwise_core::store::StoreError;

#[derive(Debug)]
pub enum ApiError {
    Unauthenticated(String),
    Booking(BookingError),
    Internal(anyhow::Error),
}

impl From<BookingError> for ApiError {
    fn from(err: BookingError) -> Self {
        ApiError::Booking(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthenticated(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Booking(err) => {
                let status = match &err {
                    BookingError::Validation(_) | BookingError::PriceMismatch { .. } => {
                        StatusCode::BAD_REQUEST
                    }
                    BookingError::Forbidden(_) => StatusCode::FORBIDDEN,
                    BookingError::NotFound(..) => StatusCode::NOT_FOUND,
                    // Expected contention outcomes.
                    BookingError::ClassFull
                    | BookingError::AlreadyBooked
                    | BookingError::AlreadySettled
                    | BookingError::OfferingCancelled
                    | BookingError::InvalidTransition { .. } => StatusCode::CONFLICT,
                    BookingError::Expired => StatusCode::GONE,
                    BookingError::Store(StoreError::Unavailable(_)) => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    BookingError::Store(StoreError::Internal(_)) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                if status.is_server_error() {
                    tracing::error!("store failure: {}", err);
                    (status, "Internal Server Error".to_string())
                } else {
                    (status, err.to_string())
                }
            }
            ApiError::Internal(err) => {
                tracing::error!("Internal Server Error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

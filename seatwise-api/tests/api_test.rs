use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use seatwise_api::{app, AppState};
use seatwise_booking::{BookingEngine, BookingPolicy};
use seatwise_core::clock::ManualClock;
use seatwise_store::InMemoryStore;

fn test_app() -> (Router, Arc<ManualClock>) {
    let store = Arc::new(InMemoryStore::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let engine = Arc::new(BookingEngine::new(
        store,
        clock.clone(),
        BookingPolicy::default(),
    ));
    (app(AppState { engine }), clock)
}

fn request(method: &str, uri: &str, principal: Option<(Uuid, &str)>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some((id, role)) = principal {
        builder = builder
            .header("x-seatwise-user", id.to_string())
            .header("x-seatwise-role", role);
    }
    match body {
        Some(value) => builder
            .header("content-type", "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn class_payload() -> Value {
    json!({
        "title": "Beginner ceramics",
        "date": "2026-09-14",
        "start_time": "18:00:00",
        "end_time": "20:00:00",
        "capacity": 2,
        "price_cents": 5000
    })
}

async fn publish_class(app: &Router, teacher: Uuid) -> Uuid {
    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/v1/classes",
            Some((teacher, "TEACHER")),
            Some(class_payload()),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    body["id"].as_str().unwrap().parse().unwrap()
}

async fn book(app: &Router, student: Uuid, class_id: Uuid) -> axum::response::Response {
    app.clone()
        .oneshot(request(
            "POST",
            "/v1/bookings",
            Some((student, "STUDENT")),
            Some(json!({ "class_id": class_id })),
        ))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let (app, _) = test_app();
    let response = app
        .oneshot(request("GET", "/health", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_missing_or_malformed_identity_headers() {
    let (app, _) = test_app();

    let response = app
        .clone()
        .oneshot(request("GET", "/v1/bookings", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(request(
            "GET",
            "/v1/bookings",
            Some((Uuid::new_v4(), "SUPERUSER")),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_students_cannot_publish_classes() {
    let (app, _) = test_app();
    let response = app
        .oneshot(request(
            "POST",
            "/v1/classes",
            Some((Uuid::new_v4(), "STUDENT")),
            Some(class_payload()),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_booking_flow_with_payment() {
    let (app, _) = test_app();
    let teacher = Uuid::new_v4();
    let student = Uuid::new_v4();
    let class_id = publish_class(&app, teacher).await;

    let response = book(&app, student, class_id).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let booking = json_body(response).await;
    assert_eq!(booking["status"], "HELD");
    let booking_id: Uuid = booking["id"].as_str().unwrap().parse().unwrap();

    // Wrong amount is a 400 with a pointed message.
    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/v1/payments",
            Some((student, "STUDENT")),
            Some(json!({ "booking_id": booking_id, "amount_cents": 100 })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/v1/payments",
            Some((student, "STUDENT")),
            Some(json!({ "booking_id": booking_id, "amount_cents": 5000, "reference": "txn-7" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let confirmed = json_body(response).await;
    assert_eq!(confirmed["status"], "CONFIRMED");

    // Settling twice conflicts.
    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/v1/payments",
            Some((student, "STUDENT")),
            Some(json!({ "booking_id": booking_id, "amount_cents": 5000 })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // The booking detail carries the captured payment and the audit log.
    let response = app
        .clone()
        .oneshot(request(
            "GET",
            &format!("/v1/bookings/{}", booking_id),
            Some((student, "STUDENT")),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let detail = json_body(response).await;
    assert_eq!(detail["payment"]["status"], "CAPTURED");
    assert_eq!(detail["events"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_capacity_and_double_booking_conflicts() {
    let (app, _) = test_app();
    let class_id = publish_class(&app, Uuid::new_v4()).await;
    let alice = Uuid::new_v4();

    assert_eq!(book(&app, alice, class_id).await.status(), StatusCode::CREATED);
    // Same student again: conflict.
    assert_eq!(book(&app, alice, class_id).await.status(), StatusCode::CONFLICT);
    // Fill the last seat, then the class is full.
    assert_eq!(
        book(&app, Uuid::new_v4(), class_id).await.status(),
        StatusCode::CREATED
    );
    let response = book(&app, Uuid::new_v4(), class_id).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = json_body(response).await;
    assert_eq!(body["error"], "class is full");
}

#[tokio::test]
async fn test_expired_hold_pays_gone() {
    let (app, clock) = test_app();
    let class_id = publish_class(&app, Uuid::new_v4()).await;
    let student = Uuid::new_v4();

    let booking = json_body(book(&app, student, class_id).await).await;
    let booking_id = booking["id"].as_str().unwrap();

    clock.advance(Duration::hours(3));
    let response = app
        .oneshot(request(
            "POST",
            "/v1/payments",
            Some((student, "STUDENT")),
            Some(json!({ "booking_id": booking_id, "amount_cents": 5000 })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GONE);
}

#[tokio::test]
async fn test_cancel_booking_and_listing_scope() {
    let (app, _) = test_app();
    let teacher = Uuid::new_v4();
    let class_id = publish_class(&app, teacher).await;
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();

    let alices = json_body(book(&app, alice, class_id).await).await;
    let alices_id = alices["id"].as_str().unwrap();
    json_body(book(&app, bob, class_id).await).await;

    // Bob cannot cancel Alice's booking.
    let response = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/v1/bookings/{}/cancel", alices_id),
            Some((bob, "STUDENT")),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // The teacher can.
    let response = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/v1/bookings/{}/cancel", alices_id),
            Some((teacher, "TEACHER")),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Cancelling again conflicts instead of duplicating.
    let response = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/v1/bookings/{}/cancel", alices_id),
            Some((teacher, "TEACHER")),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // Alice only ever sees her own bookings.
    let response = app
        .clone()
        .oneshot(request(
            "GET",
            "/v1/bookings",
            Some((alice, "STUDENT")),
            None,
        ))
        .await
        .unwrap();
    let listed = json_body(response).await;
    let listed = listed.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["student_id"].as_str().unwrap(), alice.to_string());
}

#[tokio::test]
async fn test_class_occupancy_is_derived() {
    let (app, _) = test_app();
    let class_id = publish_class(&app, Uuid::new_v4()).await;
    book(&app, Uuid::new_v4(), class_id).await;

    let response = app
        .oneshot(request(
            "GET",
            &format!("/v1/classes/{}", class_id),
            None,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let class = json_body(response).await;
    assert_eq!(class["enrolled"], 1);
    assert_eq!(class["available_spots"], 1);
    assert_eq!(class["capacity"], 2);
}

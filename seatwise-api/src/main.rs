use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seatwise_api::{app, worker, AppState};
use seatwise_booking::{BookingEngine, BookingPolicy};
use seatwise_core::clock::SystemClock;
use seatwise_core::store::ReservationStore;
use seatwise_store::{app_config::Config, InMemoryStore, PgStore};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "seatwise_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().expect("Failed to load config");
    tracing::info!("Starting Seatwise API on port {}", config.server.port);

    let store: Arc<dyn ReservationStore> = match config.store.kind.as_str() {
        "postgres" => {
            let url = config
                .store
                .url
                .as_deref()
                .expect("store.url is required for the postgres store");
            let store = PgStore::connect(url)
                .await
                .expect("Failed to connect to Postgres");
            store.migrate().await.expect("Failed to run migrations");
            Arc::new(store)
        }
        "memory" => Arc::new(InMemoryStore::new()),
        other => panic!("unknown store.kind: {}", other),
    };

    let policy = BookingPolicy {
        hold_duration: chrono::Duration::minutes(config.business_rules.hold_minutes),
    };
    let engine = Arc::new(BookingEngine::new(store, Arc::new(SystemClock), policy));

    tokio::spawn(worker::run_sweeper(
        engine.clone(),
        Duration::from_secs(config.business_rules.sweep_interval_seconds),
    ));

    let app = app(AppState { engine });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(listener, app).await.expect("server error");
}

//! HTTP server implementation using Axum.

use axum::{
    Router,
    routing::{delete, get, post},
};
use chrono::Duration;
use dosewatch_core::TreatmentType;
use dosewatch_scheduler::{Deliver, DoseStore};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    /// Dose store — shared with the monitor.
    pub store: Arc<DoseStore>,
    pub treatment_type: TreatmentType,
    pub interval: Duration,
    /// Whether undo may remove a dose that was already notified on.
    pub allow_delete_notified: bool,
    /// Transport used by the test-notification action.
    pub transport: Arc<dyn Deliver>,
    pub extras: serde_json::Map<String, serde_json::Value>,
    pub start_time: std::time::Instant,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(super::routes::health_check))
        .route("/api/v1/status", get(super::routes::status))
        .route("/api/v1/dosages", get(super::routes::dosage_history))
        .route("/api/v1/dosages", post(super::routes::record_dosage))
        .route("/api/v1/dosages/last", delete(super::routes::delete_last_dosage))
        .route("/api/v1/next-dose", get(super::routes::next_dose))
        .route("/api/v1/notify/test", post(super::routes::send_test_notification))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Serve until `shutdown` flips to true.
pub async fn serve(state: AppState, addr: &str, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("🌐 Gateway listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;
    tracing::info!("🛑 Gateway stopped");
    Ok(())
}

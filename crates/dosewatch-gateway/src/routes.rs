//! API route handlers for the gateway.

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use chrono::Utc;
use dosewatch_core::{DoseError, DoseEvent};
use dosewatch_scheduler::Deliver;
use serde::Deserialize;
use std::sync::Arc;

use super::server::AppState;

type ApiResponse = (StatusCode, Json<serde_json::Value>);

fn ok(mut body: serde_json::Value) -> ApiResponse {
    body["ok"] = serde_json::Value::Bool(true);
    (StatusCode::OK, Json(body))
}

fn fail(status: StatusCode, error: impl std::fmt::Display) -> ApiResponse {
    (status, Json(serde_json::json!({"ok": false, "error": error.to_string()})))
}

/// Storage failures are a generic 500; expected conditions get their own status.
fn error_response(context: &str, err: DoseError) -> ApiResponse {
    match err {
        DoseError::NotFound(t) => fail(StatusCode::NOT_FOUND, format!("No {t} dose to delete")),
        DoseError::AlreadyNotified(at) => fail(
            StatusCode::CONFLICT,
            format!("Last dose was already notified at {}", at.to_rfc3339()),
        ),
        other => {
            tracing::error!("❌ {context}: {other}");
            fail(StatusCode::INTERNAL_SERVER_ERROR, format!("{context}: {other}"))
        }
    }
}

fn dose_json(e: &DoseEvent) -> serde_json::Value {
    serde_json::json!({
        "treatment_type": e.treatment_type,
        "dosage_at": e.dosage_at.to_rfc3339(),
        "notified_at": e.notified_at.map(|t| t.to_rfc3339()),
    })
}

/// Health check endpoint.
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "dosewatch",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Schedule overview: last dose, next due time, totals.
pub async fn status(State(state): State<Arc<AppState>>) -> ApiResponse {
    let last = match state.store.last_dose(state.treatment_type) {
        Ok(dose) => Some(dose),
        Err(DoseError::NotFound(_)) => None,
        Err(e) => return error_response("Failed to read last dose", e),
    };
    let count = match state.store.count(state.treatment_type) {
        Ok(n) => n,
        Err(e) => return error_response("Failed to count doses", e),
    };
    let next_due = last
        .as_ref()
        .map(|l| dosewatch_scheduler::due::next_due_time(l, state.interval));

    ok(serde_json::json!({
        "treatment_type": state.treatment_type,
        "interval_secs": state.interval.num_seconds(),
        "last_dose": last.as_ref().map(dose_json),
        "next_dose_at": next_due.map(|t| t.to_rfc3339()),
        "overdue": next_due.is_some_and(|t| Utc::now() >= t),
        "dose_count": count,
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Recency window, e.g. "30d".
    pub range: Option<String>,
}

/// Dose history, most recent first.
pub async fn dosage_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> ApiResponse {
    let cutoff = match query.range.as_deref().filter(|r| !r.is_empty()) {
        Some(r) => match dosewatch_core::parse_duration(r) {
            Ok(d) => Some(d),
            Err(e) => return fail(StatusCode::BAD_REQUEST, format!("Failed to parse range: {e}")),
        },
        None => None,
    };

    match state.store.history(state.treatment_type, cutoff) {
        Ok(doses) => ok(serde_json::json!({
            "dosages": doses.iter().map(dose_json).collect::<Vec<_>>(),
        })),
        Err(e) => error_response("Failed to get dosage history", e),
    }
}

/// Record a dose taken now.
pub async fn record_dosage(State(state): State<Arc<AppState>>) -> ApiResponse {
    match state.store.record_dose(state.treatment_type) {
        Ok(dose) => {
            tracing::info!("💉 Recorded {} dose at {}", dose.treatment_type, dose.dosage_at);
            ok(serde_json::json!({ "dosage": dose_json(&dose) }))
        }
        Err(e) => error_response("Failed to record dosage", e),
    }
}

/// Undo the most recent dose.
pub async fn delete_last_dosage(State(state): State<Arc<AppState>>) -> ApiResponse {
    match state.store.delete_last(state.treatment_type, state.allow_delete_notified) {
        Ok(dose) => {
            tracing::info!("↩️ Deleted {} dose at {}", dose.treatment_type, dose.dosage_at);
            ok(serde_json::json!({ "deleted": dose_json(&dose) }))
        }
        Err(e) => error_response("Failed to delete dosage", e),
    }
}

/// Next due time; `null` when nothing has been recorded yet.
pub async fn next_dose(State(state): State<Arc<AppState>>) -> ApiResponse {
    match state.store.next_due(state.treatment_type, state.interval) {
        Ok(next) => ok(serde_json::json!({
            "next_dose_at": next.map(|t| t.to_rfc3339()),
            "scheduled": next.is_some(),
        })),
        Err(e) => error_response("Failed to compute next dose", e),
    }
}

/// Push a fixed test message through the configured transport.
pub async fn send_test_notification(State(state): State<Arc<AppState>>) -> ApiResponse {
    let notification = dosewatch_scheduler::dispatch::test_notification(&state.extras);
    match state.transport.send(&notification).await {
        Ok(()) => ok(serde_json::json!({ "message": "Notification sent, go check your phone!" })),
        Err(e) => {
            tracing::warn!("⚠️ Test notification failed: {e}");
            fail(StatusCode::BAD_GATEWAY, format!("Failed to send test notification: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::build_router;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::Duration;
    use dosewatch_core::{Notification, TreatmentType};
    use dosewatch_scheduler::DoseStore;
    use std::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Default)]
    struct FakeTransport {
        sent: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl Deliver for FakeTransport {
        async fn send(&self, n: &Notification) -> dosewatch_core::Result<()> {
            self.sent.lock().unwrap().push(n.clone());
            Ok(())
        }

        fn endpoint(&self) -> &str {
            "fake"
        }
    }

    fn test_state() -> AppState {
        AppState {
            store: Arc::new(DoseStore::open_in_memory().unwrap()),
            treatment_type: TreatmentType::Patches,
            interval: Duration::days(3),
            allow_delete_notified: false,
            transport: Arc::new(FakeTransport::default()),
            extras: serde_json::Map::new(),
            start_time: std::time::Instant::now(),
        }
    }

    async fn call(state: &AppState, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = build_router(state.clone())
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_check() {
        let json = health_check().await.0;
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_next_dose_unscheduled() {
        let state = test_state();
        let (status, json) = call(&state, "GET", "/api/v1/next-dose").await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["next_dose_at"].is_null());
        assert_eq!(json["scheduled"], false);
    }

    #[tokio::test]
    async fn test_record_then_next_dose() {
        let state = test_state();
        let (status, json) = call(&state, "POST", "/api/v1/dosages").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["dosage"]["treatment_type"], "patches");

        let last = state.store.last_dose(TreatmentType::Patches).unwrap();
        let (_, json) = call(&state, "GET", "/api/v1/next-dose").await;
        assert_eq!(json["next_dose_at"], (last.dosage_at + Duration::days(3)).to_rfc3339());
    }

    #[tokio::test]
    async fn test_history_ordering_and_range() {
        let state = test_state();
        let now = Utc::now();
        for days_ago in [40, 10, 1] {
            state
                .store
                .record_dose_at(TreatmentType::Patches, now - Duration::days(days_ago))
                .unwrap();
        }

        let (_, json) = call(&state, "GET", "/api/v1/dosages").await;
        let all = json["dosages"].as_array().unwrap();
        assert_eq!(all.len(), 3);
        assert!(all[0]["dosage_at"].as_str().unwrap() > all[1]["dosage_at"].as_str().unwrap());

        let (_, json) = call(&state, "GET", "/api/v1/dosages?range=30d").await;
        assert_eq!(json["dosages"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_history_bad_range() {
        let state = test_state();
        let (status, json) = call(&state, "GET", "/api/v1/dosages?range=soon").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["ok"], false);
    }

    #[tokio::test]
    async fn test_delete_with_nothing_recorded() {
        let state = test_state();
        let (status, json) = call(&state, "DELETE", "/api/v1/dosages/last").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(json["error"].as_str().unwrap().contains("No patches dose"));
    }

    #[tokio::test]
    async fn test_delete_notified_dose_conflicts() {
        let state = test_state();
        let dose = state.store.record_dose(TreatmentType::Patches).unwrap();
        state
            .store
            .claim_notification(TreatmentType::Patches, dose.dosage_at)
            .unwrap();

        let (status, _) = call(&state, "DELETE", "/api/v1/dosages/last").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(state.store.count(TreatmentType::Patches).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_last() {
        let state = test_state();
        state.store.record_dose(TreatmentType::Patches).unwrap();
        let (status, json) = call(&state, "DELETE", "/api/v1/dosages/last").await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["deleted"]["dosage_at"].is_string());
        assert_eq!(state.store.count(TreatmentType::Patches).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_status() {
        let state = test_state();
        let (_, json) = call(&state, "GET", "/api/v1/status").await;
        assert_eq!(json["ok"], true);
        assert_eq!(json["dose_count"], 0);
        assert!(json["last_dose"].is_null());
        assert_eq!(json["interval_secs"], 3 * 24 * 3600);
    }

    #[tokio::test]
    async fn test_send_test_notification() {
        let transport = Arc::new(FakeTransport::default());
        let state = AppState {
            transport: transport.clone(),
            ..test_state()
        };
        let (status, _) = call(&state, "POST", "/api/v1/notify/test").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(transport.sent.lock().unwrap()[0].title, "Test Notification");
    }
}

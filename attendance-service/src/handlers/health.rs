use crate::services::{get_metrics, Diagnostics};
use crate::startup::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

pub async fn root() -> impl IntoResponse {
    Json(json!({ "message": "Student Attendance API is running" }))
}

/// Tells the frontend whether forwarding is on without revealing the URL.
pub async fn public_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "sheets_webhook": state.attendance.forwarding_enabled() }))
}

/// `GET /test`: database and configuration diagnostics.
pub async fn diagnostics(State(state): State<AppState>) -> Json<Diagnostics> {
    Json(state.attendance.health().await)
}

pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "attendance-service",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

pub async fn metrics_endpoint() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

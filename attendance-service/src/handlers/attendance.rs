use crate::models::{AttendanceSubmission, StoredAttendance};
use crate::services::{SubmitResponse, DEFAULT_LIST_LIMIT};
use crate::startup::AppState;
use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use service_core::validation::ValidatedJson;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
}

/// `POST /attendance`. Only a malformed body is rejected; storage and
/// forwarding problems come back in a 200 response.
pub async fn submit_attendance(
    State(state): State<AppState>,
    ValidatedJson(submission): ValidatedJson<AttendanceSubmission>,
) -> Json<SubmitResponse> {
    let outcome = state.attendance.submit(submission).await;
    Json(outcome.response())
}

/// `GET /attendance?limit=N`
pub async fn list_attendance(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Json<Vec<StoredAttendance>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    Json(state.attendance.list(limit).await)
}

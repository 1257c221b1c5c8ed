use crate::domain::schedule::ScheduleFilter;
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
pub struct CancelScheduleBody {
    pub reason: Option<String>,
    pub cancelled_by: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReplanScheduleBody {
    pub next_retry_date: DateTime<Utc>,
    pub reason: Option<String>,
    pub replanned_by: Option<String>,
}

pub async fn get_schedule(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match state.engine.schedule_manager.get_schedule(id).await {
        Ok(schedule) => (StatusCode::OK, Json(schedule)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn list_schedules(
    State(state): State<AppState>,
    Path(organisation_id): Path<String>,
    Query(mut filter): Query<ScheduleFilter>,
) -> impl IntoResponse {
    filter.organisation_id = organisation_id;
    match state.engine.schedule_manager.list_schedules(&filter).await {
        Ok(page) => (StatusCode::OK, Json(page)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn statistics(
    State(state): State<AppState>,
    Path(organisation_id): Path<String>,
) -> impl IntoResponse {
    match state.engine.schedule_manager.statistics(&organisation_id).await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn list_attempts(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match state.engine.schedule_manager.list_attempts(id).await {
        Ok(attempts) => (StatusCode::OK, Json(attempts)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn get_attempt(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match state.engine.schedule_manager.get_attempt(id).await {
        Ok(attempt) => (StatusCode::OK, Json(attempt)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn cancel_schedule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<CancelScheduleBody>>,
) -> impl IntoResponse {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    match state
        .engine
        .schedule_manager
        .cancel(id, body.reason.as_deref(), body.cancelled_by.as_deref())
        .await
    {
        Ok(schedule) => (StatusCode::OK, Json(schedule)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn replan_schedule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ReplanScheduleBody>,
) -> impl IntoResponse {
    match state
        .engine
        .schedule_manager
        .replan(
            id,
            body.next_retry_date,
            body.reason.as_deref(),
            body.replanned_by.as_deref(),
        )
        .await
    {
        Ok(schedule) => (StatusCode::OK, Json(schedule)).into_response(),
        Err(e) => e.into_response(),
    }
}

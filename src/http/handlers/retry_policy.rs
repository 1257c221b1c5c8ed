use crate::domain::policy::UpsertRetryPolicy;
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use uuid::Uuid;

pub async fn get_retry_policy(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match state.engine.schedule_manager.resolver.get(id).await {
        Ok(policy) => (StatusCode::OK, Json(policy)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn list_retry_policies(
    State(state): State<AppState>,
    Path(organisation_id): Path<String>,
) -> impl IntoResponse {
    match state.engine.schedule_manager.resolver.list(&organisation_id).await {
        Ok(policies) => (StatusCode::OK, Json(policies)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn upsert_retry_policy(
    State(state): State<AppState>,
    Json(input): Json<UpsertRetryPolicy>,
) -> impl IntoResponse {
    match state.engine.schedule_manager.resolver.upsert(input).await {
        Ok(policy) => (StatusCode::OK, Json(policy)).into_response(),
        Err(e) => e.into_response(),
    }
}

use crate::domain::audit::AuditFilter;
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

pub async fn list_audit_log(
    State(state): State<AppState>,
    Path(organisation_id): Path<String>,
    Query(mut filter): Query<AuditFilter>,
) -> impl IntoResponse {
    filter.organisation_id = organisation_id;
    match state.engine.schedule_manager.audit.list(&filter).await {
        Ok(entries) => (StatusCode::OK, Json(entries)).into_response(),
        Err(e) => e.into_response(),
    }
}

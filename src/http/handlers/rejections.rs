use crate::domain::event::{EligibilityCheckRequest, PaymentRejectedEvent};
use crate::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

pub async fn handle_rejection(
    State(state): State<AppState>,
    Json(event): Json<PaymentRejectedEvent>,
) -> impl IntoResponse {
    match state.engine.schedule_manager.handle_rejection(event).await {
        Ok(outcome) if outcome.processed => (StatusCode::CREATED, Json(outcome)).into_response(),
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn check_eligibility(
    State(state): State<AppState>,
    Json(req): Json<EligibilityCheckRequest>,
) -> impl IntoResponse {
    match state.engine.schedule_manager.check_eligibility(req).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => e.into_response(),
    }
}

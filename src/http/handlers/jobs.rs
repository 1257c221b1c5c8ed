use crate::domain::job::{BatchRunRequest, JobFilter, RunTrigger};
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct RunJobBody {
    pub organisation_id: String,
    pub target_date: NaiveDate,
    pub cutoff_time: String,
    pub timezone: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
    pub triggered_by: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RunNowBody {
    pub organisation_id: String,
    pub schedule_id: Option<Uuid>,
    pub triggered_by: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
}

fn operator(triggered_by: Option<String>) -> String {
    triggered_by
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "operator".to_string())
}

pub async fn run_job(State(state): State<AppState>, Json(body): Json<RunJobBody>) -> impl IntoResponse {
    let orchestrator = &state.engine.orchestrator;
    let req = BatchRunRequest {
        organisation_id: body.organisation_id,
        target_date: body.target_date,
        timezone: body.timezone.unwrap_or_else(|| orchestrator.timezone.clone()),
        cutoff_time: body.cutoff_time,
        dry_run: body.dry_run,
        triggered_by: operator(body.triggered_by),
        trigger: RunTrigger::Manual,
        schedule_id: None,
    };
    match orchestrator.run(req).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn run_now(State(state): State<AppState>, Json(body): Json<RunNowBody>) -> impl IntoResponse {
    let triggered_by = operator(body.triggered_by);
    match state
        .engine
        .orchestrator
        .run_now(&body.organisation_id, body.schedule_id, &triggered_by, body.dry_run)
        .await
    {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn get_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match state.engine.orchestrator.get_job(id).await {
        Ok(job) => (StatusCode::OK, Json(job)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Path(organisation_id): Path<String>,
    Query(mut filter): Query<JobFilter>,
) -> impl IntoResponse {
    filter.organisation_id = organisation_id;
    match state.engine.orchestrator.list_jobs(&filter).await {
        Ok(page) => (StatusCode::OK, Json(page)).into_response(),
        Err(e) => e.into_response(),
    }
}

use crate::http::handlers::{audit, jobs, ops, rejections, retry_policy, schedules};
use crate::http::middleware::admin_auth::require_internal_api_key;
use crate::AppState;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post, put};
use axum::Router;

/// Public intake and read routes, plus operator routes behind the internal api key.
pub fn router(state: AppState, internal_api_key: String) -> Router {
    let admin_routes = Router::new()
        .route("/schedules/:id/cancel", post(schedules::cancel_schedule))
        .route("/schedules/:id/replan", post(schedules::replan_schedule))
        .route("/jobs/run", post(jobs::run_job))
        .route("/jobs/run-now", post(jobs::run_now))
        .route("/retry-policies", put(retry_policy::upsert_retry_policy))
        .layer(from_fn_with_state(internal_api_key, require_internal_api_key));

    Router::new()
        .route("/health", get(ops::health))
        .route("/ops/readiness", get(ops::readiness))
        .route("/ops/liveness", get(ops::liveness))
        .route("/rejections", post(rejections::handle_rejection))
        .route("/eligibility/check", post(rejections::check_eligibility))
        .route("/schedules/:id", get(schedules::get_schedule))
        .route("/schedules/:id/attempts", get(schedules::list_attempts))
        .route("/attempts/:id", get(schedules::get_attempt))
        .route(
            "/organisations/:organisation_id/schedules",
            get(schedules::list_schedules),
        )
        .route(
            "/organisations/:organisation_id/statistics",
            get(schedules::statistics),
        )
        .route("/organisations/:organisation_id/jobs", get(jobs::list_jobs))
        .route("/jobs/:id", get(jobs::get_job))
        .route("/organisations/:organisation_id/audit-logs", get(audit::list_audit_log))
        .route(
            "/organisations/:organisation_id/retry-policies",
            get(retry_policy::list_retry_policies),
        )
        .route("/retry-policies/:id", get(retry_policy::get_retry_policy))
        .merge(admin_routes)
        .with_state(state)
}

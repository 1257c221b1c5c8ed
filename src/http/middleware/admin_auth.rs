use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

pub const INTERNAL_API_KEY_HEADER: &str = "X-Internal-Api-Key";

/// Guards operator routes (cancel, replan, manual runs, policy writes).
pub async fn require_internal_api_key(
    State(expected): State<String>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let provided = request
        .headers()
        .get(INTERNAL_API_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");

    if expected.is_empty() || provided != expected {
        tracing::warn!(path = %request.uri().path(), "rejected operator request without a valid api key");
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": {"code": "UNAUTHORIZED", "message": "unauthorized"}})),
        )
            .into_response();
    }

    next.run(request).await
}

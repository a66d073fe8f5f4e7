//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};

use crate::generation::{GenerationError, GenerationRequest};
use crate::health::HealthSnapshot;
use crate::service::{GenerateError, GenerationService};

/// Seconds suggested to clients rejected by a saturated queue.
const RETRY_AFTER_SECS: &str = "5";

pub fn routes(service: Arc<GenerationService>) -> Router {
    Router::new()
        .route("/health-check", get(health_check))
        .route("/generations", post(create_generation))
        .route("/shutdown", post(shutdown))
        .with_state(service)
}

async fn health_check(State(service): State<Arc<GenerationService>>) -> Json<HealthSnapshot> {
    Json(service.health())
}

async fn create_generation(
    State(service): State<Arc<GenerationService>>,
    body: Result<Json<GenerationRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return rejection_response(rejection),
    };

    match service.generate(request).await {
        Ok(output) => (StatusCode::OK, Json(output)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn shutdown(State(service): State<Arc<GenerationService>>) -> impl IntoResponse {
    service.trigger_shutdown();
    Json(serde_json::json!({ "status": "shutting_down" }))
}

fn failure_body(error: impl ToString) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "error": error.to_string(),
        "status": "failed",
    }))
}

/// Undecodable bodies keep axum's status (400, 415 or 422) with our error shape.
fn rejection_response(rejection: JsonRejection) -> Response {
    tracing::debug!(error = %rejection.body_text(), "Rejected generation request body");
    (rejection.status(), failure_body(rejection.body_text())).into_response()
}

fn error_response(error: GenerateError) -> Response {
    let status = match &error {
        GenerateError::Admission(_) => StatusCode::SERVICE_UNAVAILABLE,
        GenerateError::Generation(GenerationError::InvalidRequest(_)) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        GenerateError::Generation(_) => StatusCode::BAD_GATEWAY,
    };

    let body = failure_body(error);

    if status == StatusCode::SERVICE_UNAVAILABLE {
        (status, [(header::RETRY_AFTER, RETRY_AFTER_SECS)], body).into_response()
    } else {
        (status, body).into_response()
    }
}

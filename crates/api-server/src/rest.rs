//! Shared REST state, error mapping and operational endpoints.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

use outreach_channels::ChannelDispatcher;
use outreach_core::error::OutreachError;
use outreach_sequences::SequenceEngine;

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: SequenceEngine,
    pub channels: Option<Arc<ChannelDispatcher>>,
    pub node_id: String,
    pub start_time: Instant,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
}

/// Engine error rendered as `{error, message}` with a matching status code.
#[derive(Debug)]
pub struct ApiError(pub OutreachError);

impl From<OutreachError> for ApiError {
    fn from(err: OutreachError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            OutreachError::NotFound(_) => StatusCode::NOT_FOUND,
            OutreachError::Conflict(_) => StatusCode::CONFLICT,
            OutreachError::InvalidState(_) => StatusCode::UNPROCESSABLE_ENTITY,
            OutreachError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "Request failed");
            metrics::counter!("api.errors").increment(1);
            "Internal processing error".to_string()
        } else {
            self.0.to_string()
        };
        let body = ErrorResponse {
            error: self.0.code().to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// GET /health: Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Operations",
    responses((status = 200, description = "Service is healthy", body = HealthResponse))
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /ready: Readiness probe.
#[utoipa::path(
    get,
    path = "/ready",
    tag = "Operations",
    responses((status = 200, description = "Ready to accept traffic"))
)]
pub async fn readiness() -> StatusCode {
    StatusCode::OK
}

/// GET /live: Liveness probe.
#[utoipa::path(
    get,
    path = "/live",
    tag = "Operations",
    responses((status = 200, description = "Process is alive"))
)]
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (OutreachError::not_found("x"), StatusCode::NOT_FOUND),
            (OutreachError::conflict("x"), StatusCode::CONFLICT),
            (OutreachError::invalid_state("x"), StatusCode::UNPROCESSABLE_ENTITY),
            (OutreachError::validation("x"), StatusCode::BAD_REQUEST),
            (
                OutreachError::Config("x".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError(err).status(), expected);
        }
    }
}

//! Wire models and error rendering

use crate::domain::errors::ApiError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// Minimal client-visible error body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Request body for team-scoped publishes
#[derive(Debug, Serialize, Deserialize)]
pub struct PublishRequest {
    pub channel: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    /// Convert to the `{status, message}` pair the client sees.
    ///
    /// Full context is logged before conversion; internal detail (queries,
    /// backend errors) never reaches the client.
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            ApiError::MalformedInput(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "Invalid JSON".to_string())
            }
            ApiError::InvalidChannel => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Invalid channel name".to_string(),
            ),
            ApiError::IdentityMissing(_) | ApiError::Storage(_) | ApiError::Bus(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Server Error".to_string())
            }
        };

        if status.is_server_error() {
            error!("request failed: {:?}", self);
        } else {
            debug!("request rejected: {}", self);
        }

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_renders_429() {
        let response = ApiError::RateLimited {
            limit: 3,
            window_secs: 60,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn server_faults_render_500() {
        let response = ApiError::IdentityMissing("team id").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn invalid_channel_renders_422() {
        let response = ApiError::InvalidChannel.into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}

//! Request-time error taxonomy for the weather endpoints.
//!
//! Every failure a handler can produce is a variant of [`ApiError`], which
//! renders as a JSON body of the form `{"error": "<message>"}` with a fixed
//! status code per variant. Upstream failures deliberately collapse to
//! uniform messages so callers cannot distinguish which upstream hop failed.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

/// JSON error envelope returned by every failing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Errors surfaced to HTTP clients by the weather endpoints.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request parameters were missing or out of range.
    #[error("{0}")]
    BadRequest(String),
    /// Geocoding produced no match for the requested city.
    #[error("City not found: {0}")]
    CityNotFound(String),
    /// The upstream weather source did not answer within the deadline.
    #[error("Weather data source timeout")]
    UpstreamTimeout,
    /// The upstream weather source answered with a non-success status.
    #[error("Weather data source unavailable")]
    UpstreamUnavailable,
    /// The upstream weather source could not be reached at all.
    #[error("Weather data source unavailable")]
    UpstreamUnreachable,
    /// The upstream weather source answered with a body we do not understand.
    #[error("Unexpected weather data format: {0}")]
    MalformedUpstreamResponse(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::CityNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            ApiError::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
            ApiError::UpstreamUnreachable => StatusCode::BAD_GATEWAY,
            ApiError::MalformedUpstreamResponse(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            ApiError::UpstreamTimeout
        } else if error.is_decode() {
            ApiError::MalformedUpstreamResponse(error.to_string())
        } else {
            ApiError::UpstreamUnreachable
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = ?self, "Upstream weather request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

//! Mapping of gateway errors onto HTTP responses.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{error, warn};

use msgate_core::Error;

use crate::api::ErrorResponse;

/// Error returned by every handler.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Failure reported by the gateway
    #[error(transparent)]
    Gateway(#[from] Error),

    /// Request body could not be decoded
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Gateway(err) => match err {
                Error::InvalidSessionId(_) | Error::InvalidInput(_) | Error::NotInitialized(_) => {
                    StatusCode::BAD_REQUEST
                }
                Error::NotConnected(_) | Error::SessionTerminated(_) => StatusCode::CONFLICT,
                Error::PairingUnavailable(_) => StatusCode::NOT_FOUND,
                Error::TransportFailure { .. } => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let caller_fault = match &self {
            ApiError::Gateway(err) => err.is_client_error(),
            ApiError::BadRequest(_) => true,
        };
        if caller_fault {
            warn!("Request rejected: {}", self);
        } else {
            error!("Request failed: {}", self);
        }

        let session_id = match &self {
            ApiError::Gateway(err) => err.session_id().map(|id| id.to_string()),
            ApiError::BadRequest(_) => None,
        };
        let body = ErrorResponse {
            error: self.to_string(),
            session_id,
        };
        (status, Json(body)).into_response()
    }
}

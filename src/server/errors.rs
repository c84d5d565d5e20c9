//! API Error Responses
//!
//! Maps engine errors onto HTTP status codes with a small JSON body:
//! `{"error": "ERR_NOT_FOUND", "message": "..."}`.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::error;
use serde_json::json;

use crate::error::Error;

/// Error returned by request handlers.
#[derive(Debug)]
pub enum ApiError {
    /// Request failed validation (400)
    BadRequest(String),
    /// Missing or rejected read token (401)
    Unauthorized(String),
    /// Workflow or step not stored (404)
    NotFound(String),
    /// Queue full or engine shutting down (503)
    ServiceUnavailable(String),
    /// Anything else (500)
    Internal(String),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let message = err.to_string();
        if err.is_not_found() {
            ApiError::NotFound(message)
        } else if err.is_token_error() {
            ApiError::Unauthorized(message)
        } else if err.is_unavailable() {
            ApiError::ServiceUnavailable(message)
        } else {
            ApiError::Internal(message)
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(e) => format!("Invalid JSON data: {}", e.body_text()),
            JsonRejection::JsonSyntaxError(e) => format!("JSON syntax error: {}", e.body_text()),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing Content-Type: application/json header".to_string()
            }
            other => format!("Failed to parse JSON: {}", other.body_text()),
        };
        ApiError::BadRequest(message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "ERR_BAD_REQUEST", msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "ERR_UNAUTHORIZED", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "ERR_NOT_FOUND", msg),
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "ERR_SERVICE_UNAVAILABLE", msg)
            }
            ApiError::Internal(msg) => {
                error!("Request failed: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "ERR_INTERNAL", msg)
            }
        };

        (status, Json(json!({ "error": code, "message": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let cases = [
            (Error::not_found("workflow", "wf_1"), StatusCode::NOT_FOUND),
            (Error::TokenInvalidSignature, StatusCode::UNAUTHORIZED),
            (Error::TokenExpired { expired_at: 1 }, StatusCode::UNAUTHORIZED),
            (Error::QueueFull, StatusCode::SERVICE_UNAVAILABLE),
            (Error::Serialization("bad".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, expected) in cases {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }
}

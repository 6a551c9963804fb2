//! HTTP error envelope
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use kms_core::KmsError;
use serde_json::{json, Value};
use tracing::error;

/// Error rendered as `{ "error": { "code", "message", "details"? } }`
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
    retry_after_secs: Option<u64>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
            retry_after_secs: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn token_invalid() -> Self {
        Self::new(StatusCode::BAD_REQUEST, "TOKEN_INVALID", "Invalid token format")
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
    }

    pub fn rate_limited(retry_after_secs: u64, message: impl Into<String>) -> Self {
        let mut err = Self::new(StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", message)
            .with_details(json!({ "retryAfterSec": retry_after_secs }));
        err.retry_after_secs = Some(retry_after_secs);
        err
    }
}

impl From<KmsError> for ApiError {
    fn from(err: KmsError) -> Self {
        let code = err.code();
        match err {
            KmsError::Unauthorized => Self::unauthorized("No active session for token"),
            KmsError::InvalidFormat(msg) => Self::new(StatusCode::BAD_REQUEST, code, msg),
            KmsError::Conflict(_) => {
                Self::new(StatusCode::CONFLICT, code, "Desired token already in use")
            }
            KmsError::NotFound(msg) => Self::new(StatusCode::NOT_FOUND, code, msg),
            KmsError::AuthenticationFailed => {
                Self::new(StatusCode::BAD_REQUEST, code, "Decryption failed")
            }
            KmsError::RateLimited { retry_after_secs } => {
                Self::rate_limited(retry_after_secs, "Too many requests")
            }
            other => {
                error!(error = %other, "Request failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, "Unexpected error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({ "code": self.code, "message": self.message });
        if let Some(details) = self.details {
            body["details"] = details;
        }

        let mut response = (self.status, Json(json!({ "error": body }))).into_response();
        if let Some(secs) = self.retry_after_secs {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

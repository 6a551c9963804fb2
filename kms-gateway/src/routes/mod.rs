//! HTTP routes for the KMS gateway
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


pub mod crypto;
pub mod health;
pub mod keys;
pub mod session;

use crate::error::{ApiError, ApiResult};
use crate::middleware::{log_request, security_headers};
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Fixed allowance for JSON framing around base64 fields
const BODY_OVERHEAD_BYTES: usize = 64 * 1024;

/// Success envelope: `{ "data": ... }`
#[derive(Debug, Serialize)]
pub struct Data<T> {
    pub data: T,
}

pub fn data<T: Serialize>(value: T) -> Json<Data<T>> {
    Json(Data { data: value })
}

/// Build the complete gateway router
pub fn router(state: AppState) -> Router {
    let body_limit = state
        .plaintext_limit_bytes
        .saturating_mul(4)
        .div_ceil(3)
        .saturating_add(BODY_OVERHEAD_BYTES);

    Router::new()
        .route("/health", get(health::health_check))
        .route("/session/init", get(session::init))
        .route("/session/key-exchange", post(session::key_exchange))
        .route("/session/rotate-token", post(session::rotate_token))
        .route("/crypto/encrypt", post(crypto::encrypt))
        .route("/crypto/decrypt", post(crypto::decrypt))
        .route("/keys/generate", post(keys::generate))
        .route("/keys/rotate", post(keys::rotate))
        .route("/keys/wrap", post(keys::wrap))
        .route("/keys/unwrap", post(keys::unwrap))
        .route("/keys/:key_id", get(keys::metadata))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

/// Parse a JSON body; an empty body parses as `{}`
pub(crate) fn parse_body<T: DeserializeOwned>(body: &Bytes) -> ApiResult<T> {
    let raw: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        body
    };
    serde_json::from_slice(raw).map_err(|e| ApiError::validation(format!("Invalid request body: {}", e)))
}

/// Decode a required base64 field
pub(crate) fn decode_field(field: &str, value: &str) -> ApiResult<Vec<u8>> {
    if value.is_empty() {
        return Err(ApiError::validation(format!("{} must not be empty", field)));
    }
    STANDARD
        .decode(value)
        .map_err(|_| ApiError::validation(format!("{} is not valid base64", field)))
}

pub(crate) fn decode_optional(field: &str, value: Option<&str>) -> ApiResult<Option<Vec<u8>>> {
    value
        .filter(|v| !v.is_empty())
        .map(|v| decode_field(field, v))
        .transpose()
}

pub(crate) fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Reject plaintexts above the configured limit with 413
pub(crate) fn check_plaintext_size(state: &AppState, plaintext: &[u8]) -> ApiResult<()> {
    if plaintext.len() > state.plaintext_limit_bytes {
        return Err(ApiError::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "PAYLOAD_TOO_LARGE",
            format!("Plaintext exceeds {} bytes", state.plaintext_limit_bytes),
        ));
    }
    Ok(())
}

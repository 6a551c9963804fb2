//! Request guards shared by the route handlers
//!
//! Token extraction, session resolution and limiter admission run inside the
//! handlers through these helpers; response headers and request logging are
//! applied to every route as `from_fn` layers.
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


use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{ConnectInfo, Request};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use kms_core::{ActiveSession, FixedWindowLimiter, KmsError, RateDecision};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::info;

pub const CLIENT_TOKEN_HEADER: &str = "x-client-token";

const SECURITY_HEADERS: [(&str, &str); 4] = [
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("referrer-policy", "no-referrer"),
    (
        "permissions-policy",
        "camera=(), microphone=(), geolocation=(), payment=()",
    ),
];

/// Raw `X-Client-Token` header, if present and non-empty
pub fn client_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(CLIENT_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Limiter key: client token, then peer address, then `"unknown"`
pub fn client_key(headers: &HeaderMap, peer: Option<&ConnectInfo<SocketAddr>>) -> String {
    if let Some(token) = client_token(headers) {
        return token.to_string();
    }
    peer.map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Token header that is present and well formed
pub fn require_token<'a>(state: &AppState, headers: &'a HeaderMap) -> ApiResult<&'a str> {
    let token =
        client_token(headers).ok_or_else(|| ApiError::unauthorized("Missing X-Client-Token"))?;
    if !state.sessions.is_valid_token(token) {
        return Err(ApiError::token_invalid());
    }
    Ok(token)
}

/// Active session bound to the request's token
pub async fn require_session(state: &AppState, headers: &HeaderMap) -> ApiResult<ActiveSession> {
    let token = require_token(state, headers)?;
    state
        .sessions
        .lookup(token)
        .await
        .ok_or_else(|| KmsError::Unauthorized.into())
}

/// Admit the request against `limiter` or fail with 429
pub async fn enforce(
    limiter: &FixedWindowLimiter,
    key: &str,
    message: &'static str,
) -> ApiResult<()> {
    match limiter.check(key).await {
        RateDecision::Allow => Ok(()),
        RateDecision::Deny { retry_after_secs } => {
            Err(ApiError::rate_limited(retry_after_secs, message))
        }
    }
}

/// Attach the fixed security headers to every response
pub async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    for (name, value) in SECURITY_HEADERS {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }
    response
}

/// One structured line per request
pub async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string());
    let started = Instant::now();

    let response = next.run(request).await;

    info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started.elapsed().as_millis() as u64,
        peer = peer.as_deref().unwrap_or("unknown"),
        "Request handled"
    );
    response
}

//! Session handshake and token rotation
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


use super::{data, parse_body, Data};
use crate::error::{ApiError, ApiResult};
use crate::middleware::{client_key, client_token, enforce, require_token};
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use kms_core::{KmsError, SessionKey, TokenRotation};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tracing::{info, warn};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitResponse {
    pub session_id: String,
    pub rsa_public_key_pem: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyExchangeRequest {
    session_id: String,
    /// RSA-OAEP wrapped session key, base64
    wrapped_key: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyExchangeResponse {
    pub session_id: String,
    pub expires_at: i64,
}

#[derive(Debug, Default, Deserialize)]
struct RotateRequest {
    token: Option<String>,
}

/// Issue a session id together with the handshake public key
pub async fn init(State(state): State<AppState>) -> Json<Data<InitResponse>> {
    data(InitResponse {
        session_id: state.sessions.create_pending_session(),
        rsa_public_key_pem: state.handshake.public_key_pem().to_string(),
    })
}

fn key_exchange_failed(details: impl Into<String>) -> ApiError {
    ApiError::new(
        StatusCode::BAD_REQUEST,
        "KEY_EXCHANGE_FAILED",
        "Unable to unwrap session key",
    )
    .with_details(serde_json::Value::String(details.into()))
}

/// Unwrap the client's session key and bind it to the request token
pub async fn key_exchange(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Data<KeyExchangeResponse>>> {
    let token = require_token(&state, &headers)?;
    let request: KeyExchangeRequest = parse_body(&body)?;
    if request.session_id.trim().is_empty() || request.wrapped_key.is_empty() {
        return Err(ApiError::validation("sessionId and wrappedKey are required"));
    }

    let wrapped = STANDARD
        .decode(&request.wrapped_key)
        .map_err(|e| key_exchange_failed(e.to_string()))?;

    // RSA private-key operations are CPU bound
    let handshake = state.handshake.clone();
    let unwrapped = tokio::task::spawn_blocking(move || handshake.unwrap_session_key(&wrapped))
        .await
        .map_err(|e| ApiError::from(KmsError::Crypto(e.to_string())))?;
    let key = match unwrapped {
        Ok(bytes) => SessionKey::from_bytes(bytes),
        Err(e) => {
            warn!(session_id = %request.session_id, error = %e, "Key exchange failed");
            return Err(key_exchange_failed(e.to_string()));
        }
    };

    let session = state
        .sessions
        .complete_handshake(&request.session_id, token, key, state.sessions.default_ttl())
        .await?;

    info!(
        session_id = %session.session_id,
        expires_at = session.expires_at,
        "Key exchange completed"
    );
    Ok(data(KeyExchangeResponse {
        session_id: session.session_id,
        expires_at: session.expires_at,
    }))
}

/// Rotate the request token, or replace it with the one in the body
pub async fn rotate_token(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Data<TokenRotation>>> {
    enforce(
        &state.limiters.rotate,
        &client_key(&headers, peer.as_ref()),
        "Too many token rotations",
    )
    .await?;

    let old_token =
        client_token(&headers).ok_or_else(|| ApiError::unauthorized("Missing X-Client-Token"))?;
    let request: RotateRequest = parse_body(&body)?;

    let result = match request.token.as_deref().filter(|t| !t.is_empty()) {
        Some(desired) => state.sessions.replace_token(old_token, desired).await,
        None => state.sessions.rotate_token(old_token).await,
    };

    match result {
        Ok(rotation) => Ok(data(rotation)),
        Err(KmsError::NotFound(_)) => Err(ApiError::unauthorized("No active session for token")),
        Err(KmsError::InvalidFormat(_)) => Err(ApiError::token_invalid()),
        Err(e) => Err(e.into()),
    }
}

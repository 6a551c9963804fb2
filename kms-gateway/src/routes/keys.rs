//! Versioned data-key management
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


use super::{check_plaintext_size, data, decode_field, decode_optional, encode, parse_body, Data};
use crate::error::{ApiError, ApiResult};
use crate::middleware::{client_key, enforce, require_session};
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use kms_core::{KeyHandle, KeyMetadata};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tracing::info;

const KEYS_LIMIT_MESSAGE: &str = "Too many key management requests";
const CRYPTO_LIMIT_MESSAGE: &str = "Too many crypto requests";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RotateRequest {
    key_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WrapRequest {
    key_id: String,
    version: Option<u32>,
    plaintext: String,
    aad: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnwrapRequest {
    key_id: String,
    version: u32,
    ciphertext: String,
    iv: String,
    tag: String,
    aad: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WrapResponse {
    pub key_id: String,
    pub version: u32,
    pub ciphertext: String,
    pub iv: String,
    pub tag: String,
}

#[derive(Debug, Serialize)]
pub struct UnwrapResponse {
    pub plaintext: String,
}

fn require_key_id(key_id: &str) -> ApiResult<()> {
    if key_id.trim().is_empty() {
        return Err(ApiError::validation("keyId is required"));
    }
    Ok(())
}

pub async fn generate(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> ApiResult<(StatusCode, Json<Data<KeyHandle>>)> {
    enforce(&state.limiters.keys, &client_key(&headers, peer.as_ref()), KEYS_LIMIT_MESSAGE).await?;
    let session = require_session(&state, &headers).await?;

    let handle = state.keys.generate_key().await?;
    info!(
        key_id = %handle.key_id,
        session_id = %session.session_id,
        "Data key generated"
    );
    Ok((StatusCode::CREATED, data(handle)))
}

pub async fn rotate(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Data<KeyHandle>>> {
    enforce(&state.limiters.keys, &client_key(&headers, peer.as_ref()), KEYS_LIMIT_MESSAGE).await?;
    require_session(&state, &headers).await?;

    let request: RotateRequest = parse_body(&body)?;
    require_key_id(&request.key_id)?;
    let handle = state.keys.rotate_key(&request.key_id).await?;
    Ok(data(handle))
}

pub async fn metadata(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Path(key_id): Path<String>,
) -> ApiResult<Json<Data<KeyMetadata>>> {
    enforce(&state.limiters.keys, &client_key(&headers, peer.as_ref()), KEYS_LIMIT_MESSAGE).await?;
    require_session(&state, &headers).await?;

    let metadata = state.keys.get_metadata(&key_id).await?;
    Ok(data(metadata))
}

pub async fn wrap(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Data<WrapResponse>>> {
    enforce(&state.limiters.crypto, &client_key(&headers, peer.as_ref()), CRYPTO_LIMIT_MESSAGE).await?;
    require_session(&state, &headers).await?;

    let request: WrapRequest = parse_body(&body)?;
    require_key_id(&request.key_id)?;
    let plaintext = decode_field("plaintext", &request.plaintext)?;
    check_plaintext_size(&state, &plaintext)?;
    let aad = decode_optional("aad", request.aad.as_deref())?;

    let wrapped = state
        .keys
        .wrap(&request.key_id, request.version, &plaintext, aad.as_deref())
        .await?;
    Ok(data(WrapResponse {
        key_id: wrapped.key_id,
        version: wrapped.version,
        ciphertext: encode(&wrapped.ciphertext),
        iv: encode(&wrapped.nonce),
        tag: encode(&wrapped.tag),
    }))
}

pub async fn unwrap(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Data<UnwrapResponse>>> {
    enforce(&state.limiters.crypto, &client_key(&headers, peer.as_ref()), CRYPTO_LIMIT_MESSAGE).await?;
    require_session(&state, &headers).await?;

    let request: UnwrapRequest = parse_body(&body)?;
    require_key_id(&request.key_id)?;
    let ciphertext = decode_field("ciphertext", &request.ciphertext)?;
    let iv = decode_field("iv", &request.iv)?;
    let tag = decode_field("tag", &request.tag)?;
    let aad = decode_optional("aad", request.aad.as_deref())?;

    let plaintext = state
        .keys
        .unwrap(&request.key_id, request.version, &ciphertext, &iv, &tag, aad.as_deref())
        .await?;
    Ok(data(UnwrapResponse {
        plaintext: encode(&plaintext),
    }))
}

//! AES-256-GCM under the caller's session key
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
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::Json;
use kms_core::crypto::{aead_decrypt, aead_encrypt};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

pub const ALGORITHM: &str = "AES-256-GCM";

#[derive(Debug, Deserialize)]
struct EncryptRequest {
    algorithm: String,
    plaintext: String,
    aad: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DecryptRequest {
    algorithm: String,
    ciphertext: String,
    iv: String,
    tag: String,
    aad: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SealedResponse {
    pub ciphertext: String,
    pub iv: String,
    pub tag: String,
}

#[derive(Debug, Serialize)]
pub struct PlaintextResponse {
    pub plaintext: String,
}

fn check_algorithm(algorithm: &str) -> ApiResult<()> {
    if algorithm != ALGORITHM {
        return Err(ApiError::validation(format!(
            "Unsupported algorithm {:?}, expected {}",
            algorithm, ALGORITHM
        )));
    }
    Ok(())
}

pub async fn encrypt(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Data<SealedResponse>>> {
    enforce(
        &state.limiters.crypto,
        &client_key(&headers, peer.as_ref()),
        "Too many crypto requests",
    )
    .await?;
    let session = require_session(&state, &headers).await?;

    let request: EncryptRequest = parse_body(&body)?;
    check_algorithm(&request.algorithm)?;
    let plaintext = decode_field("plaintext", &request.plaintext)?;
    check_plaintext_size(&state, &plaintext)?;
    let aad = decode_optional("aad", request.aad.as_deref())?;

    let sealed = aead_encrypt(&plaintext, session.key.as_bytes(), aad.as_deref())?;
    Ok(data(SealedResponse {
        ciphertext: encode(&sealed.ciphertext),
        iv: encode(&sealed.nonce),
        tag: encode(&sealed.tag),
    }))
}

pub async fn decrypt(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Data<PlaintextResponse>>> {
    enforce(
        &state.limiters.crypto,
        &client_key(&headers, peer.as_ref()),
        "Too many crypto requests",
    )
    .await?;
    let session = require_session(&state, &headers).await?;

    let request: DecryptRequest = parse_body(&body)?;
    check_algorithm(&request.algorithm)?;
    let ciphertext = decode_field("ciphertext", &request.ciphertext)?;
    let iv = decode_field("iv", &request.iv)?;
    let tag = decode_field("tag", &request.tag)?;
    let aad = decode_optional("aad", request.aad.as_deref())?;

    let plaintext = aead_decrypt(&ciphertext, &iv, &tag, session.key.as_bytes(), aad.as_deref())?;
    Ok(data(PlaintextResponse {
        plaintext: encode(&plaintext),
    }))
}

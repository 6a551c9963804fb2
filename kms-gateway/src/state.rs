//! Shared handler state
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


use kms_config::AppConfig;
use kms_core::crypto::HandshakeKeyPair;
use kms_core::{init_handshake_key_pair, init_key_store, KeyStore, KmsResult, RateLimiters, SessionManager};
use std::sync::Arc;

/// Explicitly constructed stores handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub keys: KeyStore,
    pub limiters: Arc<RateLimiters>,
    pub handshake: Arc<HandshakeKeyPair>,
    /// Largest decoded plaintext accepted by the crypto endpoints
    pub plaintext_limit_bytes: usize,
}

impl AppState {
    pub fn new(
        sessions: Arc<SessionManager>,
        keys: KeyStore,
        limiters: Arc<RateLimiters>,
        handshake: Arc<HandshakeKeyPair>,
        plaintext_limit_bytes: usize,
    ) -> Self {
        Self {
            sessions,
            keys,
            limiters,
            handshake,
            plaintext_limit_bytes,
        }
    }

    /// Build every store from configuration
    pub async fn from_config(config: &AppConfig) -> KmsResult<Self> {
        let keys = init_key_store(&config.key_store).await?;
        let handshake = init_handshake_key_pair(&config.key_store).await?;

        Ok(Self::new(
            Arc::new(SessionManager::from_config(&config.session)),
            keys,
            Arc::new(RateLimiters::from_config(&config.rate_limits)),
            Arc::new(handshake),
            config.crypto_plaintext_limit_bytes,
        ))
    }
}

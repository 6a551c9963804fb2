//! High-level key store interface
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


use crate::crypto::{aead_decrypt, aead_encrypt, NONCE_LEN, TAG_LEN};
use crate::error::KmsResult;
use crate::key_types::{DataKey, KeyHandle, KeyId, KeyMetadata};
use crate::kms::KeyManagementService;
use std::sync::Arc;
use tracing::debug;

/// Payload encrypted under one version of a data key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedPayload {
    pub key_id: KeyId,
    pub version: u32,
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
    pub tag: [u8; TAG_LEN],
}

/// High-level key store that wraps a KMS backend
#[derive(Clone)]
pub struct KeyStore {
    backend: Arc<dyn KeyManagementService>,
}

impl KeyStore {
    /// Create a new key store with a KMS backend
    pub fn new(backend: Arc<dyn KeyManagementService>) -> Self {
        Self { backend }
    }

    pub async fn generate_key(&self) -> KmsResult<KeyHandle> {
        self.backend.generate_key().await
    }

    pub async fn rotate_key(&self, key_id: &str) -> KmsResult<KeyHandle> {
        self.backend.rotate_key(key_id).await
    }

    pub async fn get_metadata(&self, key_id: &str) -> KmsResult<KeyMetadata> {
        self.backend.get_metadata(key_id).await
    }

    /// Raw material; stays inside the process
    pub async fn get_key_material(&self, key_id: &str, version: u32) -> KmsResult<DataKey> {
        self.backend.get_key_material(key_id, version).await
    }

    pub async fn list_keys(&self) -> KmsResult<Vec<KeyId>> {
        self.backend.list_keys().await
    }

    /// Encrypt `plaintext` under `version` of `key_id`, or its active version
    pub async fn wrap(
        &self,
        key_id: &str,
        version: Option<u32>,
        plaintext: &[u8],
        aad: Option<&[u8]>,
    ) -> KmsResult<WrappedPayload> {
        let version = match version {
            Some(version) => version,
            None => self.backend.active_version(key_id).await?.version,
        };
        let material = self.backend.get_key_material(key_id, version).await?;
        let sealed = aead_encrypt(plaintext, material.as_bytes(), aad)?;

        debug!(key_id = %key_id, version = version, "Wrapped payload");
        Ok(WrappedPayload {
            key_id: key_id.to_string(),
            version,
            ciphertext: sealed.ciphertext,
            nonce: sealed.nonce,
            tag: sealed.tag,
        })
    }

    /// Decrypt a payload produced by `wrap`
    pub async fn unwrap(
        &self,
        key_id: &str,
        version: u32,
        ciphertext: &[u8],
        nonce: &[u8],
        tag: &[u8],
        aad: Option<&[u8]>,
    ) -> KmsResult<Vec<u8>> {
        let material = self.backend.get_key_material(key_id, version).await?;
        let plaintext = aead_decrypt(ciphertext, nonce, tag, material.as_bytes(), aad)?;

        debug!(key_id = %key_id, version = version, "Unwrapped payload");
        Ok(plaintext)
    }
}

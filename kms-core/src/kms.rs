//! KMS backend interface
//!
//! Versioned data-key storage behind a trait so the high-level `KeyStore`
//! does not care where records live. `LocalKeyStore` (a JSON snapshot file)
//! is the only backend today.
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


use crate::error::KmsResult;
use crate::key_types::{DataKey, KeyHandle, KeyId, KeyMetadata};
use async_trait::async_trait;

/// Trait for Key Management Service backends
#[async_trait]
pub trait KeyManagementService: Send + Sync {
    /// Create a key with a single active version 1
    async fn generate_key(&self) -> KmsResult<KeyHandle>;

    /// Deprecate the active version and append a new active one
    async fn rotate_key(&self, key_id: &str) -> KmsResult<KeyHandle>;

    /// Version descriptors, without material
    async fn get_metadata(&self, key_id: &str) -> KmsResult<KeyMetadata>;

    /// Material for one version, deprecated versions included
    async fn get_key_material(&self, key_id: &str, version: u32) -> KmsResult<DataKey>;

    /// Handle of the currently active version
    async fn active_version(&self, key_id: &str) -> KmsResult<KeyHandle>;

    /// List all key IDs
    async fn list_keys(&self) -> KmsResult<Vec<KeyId>>;
}

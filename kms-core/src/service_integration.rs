//! Service integration helpers for wiring the core into a server
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


use crate::crypto::HandshakeKeyPair;
use crate::error::KmsResult;
use crate::key_store::KeyStore;
use crate::local_store::LocalKeyStore;
use kms_config::KeyStoreConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Open the snapshot-backed key store described by `config`
pub async fn init_key_store(config: &KeyStoreConfig) -> KmsResult<KeyStore> {
    info!(path = %config.path, "Initializing key store");

    let local_store =
        LocalKeyStore::open(&config.path, Duration::from_secs(config.grace_period_secs)).await?;
    Ok(KeyStore::new(Arc::new(local_store)))
}

/// Load the handshake RSA key pair next to the key store, generating it on first start
pub async fn init_handshake_key_pair(config: &KeyStoreConfig) -> KmsResult<HandshakeKeyPair> {
    HandshakeKeyPair::load_or_create(&config.path, config.rsa_bits).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_from_config() {
        let dir = TempDir::new().unwrap();
        let config = KeyStoreConfig {
            path: dir.path().join("nested").to_string_lossy().into_owned(),
            rsa_bits: 1024,
            grace_period_secs: 60,
        };

        let keys = init_key_store(&config).await.unwrap();
        let handle = keys.generate_key().await.unwrap();
        keys.rotate_key(&handle.key_id).await.unwrap();
        let metadata = keys.get_metadata(&handle.key_id).await.unwrap();
        let grace = metadata.versions[0].expires_at.unwrap() - metadata.versions[1].created_at;
        assert_eq!(grace, 60_000);

        let pair = init_handshake_key_pair(&config).await.unwrap();
        assert!(pair.public_key_pem().starts_with("-----BEGIN PUBLIC KEY-----"));
    }
}

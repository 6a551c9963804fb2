//! Key type definitions
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


use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a key record
pub type KeyId = String;

/// Length of data-key material in bytes
pub const DATA_KEY_LEN: usize = 32;

/// 256-bit data-key material
#[derive(Clone, PartialEq, Eq)]
pub struct DataKey([u8; DATA_KEY_LEN]);

impl DataKey {
    /// Fresh random material from the OS-seeded thread RNG
    pub fn generate() -> Self {
        let mut bytes = [0u8; DATA_KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; DATA_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DATA_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DataKey([REDACTED])")
    }
}

/// Lifecycle state of a key version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyVersionStatus {
    /// Current version used for new encryptions
    Active,
    /// Superseded by a rotation, retained for decryption
    Deprecated,
}

/// One generation of key material
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyVersion {
    /// Version number, 1-based
    pub version: u32,
    /// Epoch milliseconds
    pub created_at: i64,
    pub status: KeyVersionStatus,
    /// End of the grace period, set on deprecation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(rename = "materialB64", with = "material_b64")]
    pub material: DataKey,
}

impl KeyVersion {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            created_at: chrono::Utc::now().timestamp_millis(),
            status: KeyVersionStatus::Active,
            expires_at: None,
            material: DataKey::generate(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == KeyVersionStatus::Active
    }

    /// Whether the grace period of a deprecated version has passed
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => chrono::Utc::now().timestamp_millis() > expires_at,
            None => false,
        }
    }

    pub fn info(&self) -> KeyVersionInfo {
        KeyVersionInfo {
            version: self.version,
            created_at: self.created_at,
            status: self.status,
            expires_at: self.expires_at,
        }
    }
}

/// Durable record for one data key and all of its versions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRecord {
    pub key_id: KeyId,
    pub created_at: i64,
    pub versions: Vec<KeyVersion>,
}

impl KeyRecord {
    /// New record holding a single active version 1
    pub fn new(key_id: KeyId) -> Self {
        let initial_version = KeyVersion::new(1);
        Self {
            key_id,
            created_at: initial_version.created_at,
            versions: vec![initial_version],
        }
    }

    pub fn active_version(&self) -> Option<&KeyVersion> {
        self.versions.iter().find(|v| v.is_active())
    }

    pub fn version(&self, version: u32) -> Option<&KeyVersion> {
        self.versions.iter().find(|v| v.version == version)
    }

    pub fn latest_version(&self) -> u32 {
        self.versions.iter().map(|v| v.version).max().unwrap_or(0)
    }

    /// Deprecate the active version and append a fresh active one.
    ///
    /// Returns the new version number.
    pub fn rotate(&mut self, grace_period_ms: i64) -> u32 {
        let now = chrono::Utc::now().timestamp_millis();
        for v in self.versions.iter_mut().filter(|v| v.is_active()) {
            v.status = KeyVersionStatus::Deprecated;
            v.expires_at = Some(now.saturating_add(grace_period_ms));
        }

        let mut next = KeyVersion::new(self.latest_version() + 1);
        next.created_at = now;
        let number = next.version;
        self.versions.push(next);
        number
    }

    pub fn metadata(&self) -> KeyMetadata {
        KeyMetadata {
            key_id: self.key_id.clone(),
            created_at: self.created_at,
            versions: self.versions.iter().map(KeyVersion::info).collect(),
        }
    }
}

/// Version descriptor without material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyVersionInfo {
    pub version: u32,
    pub created_at: i64,
    pub status: KeyVersionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

/// Key metadata exposed to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMetadata {
    pub key_id: KeyId,
    pub created_at: i64,
    /// Ordered by version number
    pub versions: Vec<KeyVersionInfo>,
}

/// Identifies one version of a key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyHandle {
    pub key_id: KeyId,
    pub version: u32,
}

mod material_b64 {
    use super::{DataKey, DATA_KEY_LEN};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(key: &DataKey, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(key.as_bytes()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DataKey, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = STANDARD.decode(encoded.as_bytes()).map_err(<D::Error as de::Error>::custom)?;
        let bytes: [u8; DATA_KEY_LEN] = bytes.try_into().map_err(|b: Vec<u8>| {
            <D::Error as de::Error>::custom(format!("key material must be {} bytes, got {}", DATA_KEY_LEN, b.len()))
        })?;
        Ok(DataKey::from_bytes(bytes))
    }
}

//! Local file-backed key storage
//!
//! All records are held in memory and mirrored to a single JSON snapshot
//! (`keys.json`). Every mutation rewrites the snapshot through a temporary
//! file followed by an atomic rename, so the canonical file is never seen
//! half-written.
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


use crate::error::{KmsError, KmsResult};
use crate::key_types::{DataKey, KeyHandle, KeyId, KeyMetadata, KeyRecord};
use crate::kms::KeyManagementService;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Snapshot file name inside the store directory
pub const SNAPSHOT_FILE: &str = "keys.json";

/// Default retention of a deprecated version after rotation
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Local snapshot-backed key store
pub struct LocalKeyStore {
    snapshot_path: PathBuf,
    grace_period: Duration,
    records: RwLock<HashMap<KeyId, KeyRecord>>,
}

impl LocalKeyStore {
    /// Open (or initialize) the store in `storage_path`
    ///
    /// Fails with `PermissionDenied` if the directory cannot be written. An
    /// unreadable snapshot is discarded and replaced by an empty one.
    pub async fn open<P: AsRef<Path>>(storage_path: P, grace_period: Duration) -> KmsResult<Self> {
        let storage_path = storage_path.as_ref().to_path_buf();
        ensure_writable(&storage_path).await?;

        let store = Self {
            snapshot_path: storage_path.join(SNAPSHOT_FILE),
            grace_period,
            records: RwLock::new(HashMap::new()),
        };
        store.load().await?;

        Ok(store)
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    async fn load(&self) -> KmsResult<()> {
        let mut records = self.records.write().await;

        let bytes = match fs::read(&self.snapshot_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.snapshot_path.display(), "No snapshot yet, creating an empty one");
                records.clear();
                return self.persist(&records).await;
            }
            Err(e) => return Err(e.into()),
        };

        match parse_snapshot(&bytes) {
            Ok(loaded) => {
                *records = loaded;
                info!(keys = records.len(), "Loaded key store snapshot");
                Ok(())
            }
            Err(e) => {
                warn!(
                    path = %self.snapshot_path.display(),
                    error = %e,
                    "Key store snapshot unreadable, resetting to empty"
                );
                records.clear();
                self.persist(&records).await
            }
        }
    }

    /// Write the full snapshot via temp file + rename
    async fn persist(&self, records: &HashMap<KeyId, KeyRecord>) -> KmsResult<()> {
        let mut ordered: Vec<&KeyRecord> = records.values().collect();
        ordered.sort_by(|a, b| (a.created_at, &a.key_id).cmp(&(b.created_at, &b.key_id)));
        let json = serde_json::to_vec_pretty(&ordered)?;

        write_atomically(&self.snapshot_path, &self.temp_path(), &json).await?;

        debug!(keys = ordered.len(), "Key store snapshot persisted");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        self.snapshot_path.with_file_name(format!(
            "{}.tmp-{}-{}",
            SNAPSHOT_FILE,
            std::process::id(),
            nanos
        ))
    }

    fn grace_period_ms(&self) -> i64 {
        i64::try_from(self.grace_period.as_millis()).unwrap_or(i64::MAX)
    }
}

#[async_trait]
impl KeyManagementService for LocalKeyStore {
    async fn generate_key(&self) -> KmsResult<KeyHandle> {
        let mut records = self.records.write().await;

        let mut key_id = uuid::Uuid::new_v4().to_string();
        while records.contains_key(&key_id) {
            key_id = uuid::Uuid::new_v4().to_string();
        }

        let mut next = records.clone();
        next.insert(key_id.clone(), KeyRecord::new(key_id.clone()));
        self.persist(&next).await?;
        *records = next;

        info!(key_id = %key_id, "Generated key");
        Ok(KeyHandle { key_id, version: 1 })
    }

    async fn rotate_key(&self, key_id: &str) -> KmsResult<KeyHandle> {
        let mut records = self.records.write().await;
        if !records.contains_key(key_id) {
            return Err(KmsError::NotFound(format!("key {}", key_id)));
        }

        let mut next = records.clone();
        let version = match next.get_mut(key_id) {
            Some(record) => record.rotate(self.grace_period_ms()),
            None => return Err(KmsError::NotFound(format!("key {}", key_id))),
        };
        self.persist(&next).await?;
        *records = next;

        info!(key_id = %key_id, version = version, "Rotated key");
        Ok(KeyHandle {
            key_id: key_id.to_string(),
            version,
        })
    }

    async fn get_metadata(&self, key_id: &str) -> KmsResult<KeyMetadata> {
        let records = self.records.read().await;
        records
            .get(key_id)
            .map(KeyRecord::metadata)
            .ok_or_else(|| KmsError::NotFound(format!("key {}", key_id)))
    }

    async fn get_key_material(&self, key_id: &str, version: u32) -> KmsResult<DataKey> {
        let records = self.records.read().await;
        let record = records
            .get(key_id)
            .ok_or_else(|| KmsError::NotFound(format!("key {}", key_id)))?;
        let key_version = record
            .version(version)
            .ok_or_else(|| KmsError::NotFound(format!("key {} version {}", key_id, version)))?;

        if key_version.is_expired() {
            debug!(
                key_id = %key_id,
                version = version,
                "Serving deprecated key version past its grace period"
            );
        }
        Ok(key_version.material.clone())
    }

    async fn active_version(&self, key_id: &str) -> KmsResult<KeyHandle> {
        let records = self.records.read().await;
        let record = records
            .get(key_id)
            .ok_or_else(|| KmsError::NotFound(format!("key {}", key_id)))?;
        let active = record
            .active_version()
            .ok_or_else(|| KmsError::NotFound(format!("active version of key {}", key_id)))?;
        Ok(KeyHandle {
            key_id: record.key_id.clone(),
            version: active.version,
        })
    }

    async fn list_keys(&self) -> KmsResult<Vec<KeyId>> {
        let records = self.records.read().await;
        let mut ids: Vec<KeyId> = records.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// Replace `target` with `bytes` through `tmp_path` and a rename
///
/// `target` is either the old or the new content; the temp file is removed on
/// failure.
async fn write_atomically(target: &Path, tmp_path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let result = async {
        let mut file = fs::File::create(tmp_path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(tmp_path, target).await
    }
    .await;

    if let Err(e) = result {
        let _ = fs::remove_file(tmp_path).await;
        return Err(e);
    }

    sync_parent_dir(target).await;
    Ok(())
}

/// Flush the directory entry created by the rename
#[cfg(unix)]
async fn sync_parent_dir(path: &Path) {
    let Some(parent) = path.parent() else {
        return;
    };
    let synced = async { fs::File::open(parent).await?.sync_all().await }.await;
    if let Err(e) = synced {
        warn!(path = %parent.display(), error = %e, "Failed to sync key store directory");
    }
}

#[cfg(not(unix))]
async fn sync_parent_dir(_path: &Path) {}

/// Create `dir` and prove it is writable with a probe file
async fn ensure_writable(dir: &Path) -> KmsResult<()> {
    let denied = |e: std::io::Error| {
        KmsError::PermissionDenied(format!("{} not writeable: {}", dir.display(), e))
    };

    fs::create_dir_all(dir).await.map_err(denied)?;
    let probe = dir.join(format!(
        ".write-test-{}",
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));
    fs::write(&probe, b"ok").await.map_err(denied)?;
    fs::remove_file(&probe).await.map_err(denied)?;
    Ok(())
}

fn parse_snapshot(bytes: &[u8]) -> KmsResult<HashMap<KeyId, KeyRecord>> {
    let list: Vec<KeyRecord> = serde_json::from_slice(bytes)
        .map_err(|e| KmsError::StorageCorrupt(e.to_string()))?;

    let mut records = HashMap::with_capacity(list.len());
    for record in list {
        validate_record(&record).map_err(KmsError::StorageCorrupt)?;
        let key_id = record.key_id.clone();
        if records.insert(key_id.clone(), record).is_some() {
            return Err(KmsError::StorageCorrupt(format!("duplicate key id {}", key_id)));
        }
    }
    Ok(records)
}

fn validate_record(record: &KeyRecord) -> Result<(), String> {
    let active = record.versions.iter().filter(|v| v.is_active()).count();
    if active != 1 {
        return Err(format!(
            "key {} has {} active versions",
            record.key_id, active
        ));
    }

    let mut seen = HashSet::new();
    if !record.versions.iter().all(|v| v.version >= 1 && seen.insert(v.version)) {
        return Err(format!("key {} has invalid version numbers", record.key_id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_types::KeyVersionStatus;
    use tempfile::TempDir;

    async fn open(dir: &TempDir) -> LocalKeyStore {
        LocalKeyStore::open(dir.path(), DEFAULT_GRACE_PERIOD)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_open_creates_empty_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        let content = std::fs::read_to_string(store.snapshot_path()).unwrap();
        assert_eq!(serde_json::from_str::<Vec<KeyRecord>>(&content).unwrap().len(), 0);
        assert!(store.list_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generate_key_starts_at_version_one() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        let handle = store.generate_key().await.unwrap();
        assert_eq!(handle.version, 1);
        assert!(uuid::Uuid::parse_str(&handle.key_id).is_ok());

        let metadata = store.get_metadata(&handle.key_id).await.unwrap();
        assert_eq!(metadata.versions.len(), 1);
        assert_eq!(metadata.versions[0].status, KeyVersionStatus::Active);
    }

    #[tokio::test]
    async fn test_rotations_produce_sequential_versions() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        let handle = store.generate_key().await.unwrap();

        for expected in 2..=5 {
            let rotated = store.rotate_key(&handle.key_id).await.unwrap();
            assert_eq!(rotated.version, expected);
        }

        let metadata = store.get_metadata(&handle.key_id).await.unwrap();
        let numbers: Vec<u32> = metadata.versions.iter().map(|v| v.version).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);

        let active: Vec<_> = metadata
            .versions
            .iter()
            .filter(|v| v.status == KeyVersionStatus::Active)
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].version, 5);
        assert!(metadata.versions[..4].iter().all(|v| v.expires_at.is_some()));
        assert_eq!(store.active_version(&handle.key_id).await.unwrap().version, 5);
    }

    #[tokio::test]
    async fn test_grace_period_is_recorded() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        let handle = store.generate_key().await.unwrap();
        store.rotate_key(&handle.key_id).await.unwrap();

        let metadata = store.get_metadata(&handle.key_id).await.unwrap();
        let deprecated = &metadata.versions[0];
        let grace = deprecated.expires_at.unwrap() - metadata.versions[1].created_at;
        assert_eq!(grace, 7 * 24 * 60 * 60 * 1000);
    }

    #[tokio::test]
    async fn test_deprecated_material_remains_available() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        let handle = store.generate_key().await.unwrap();
        let original = store.get_key_material(&handle.key_id, 1).await.unwrap();

        store.rotate_key(&handle.key_id).await.unwrap();
        assert_eq!(store.get_key_material(&handle.key_id, 1).await.unwrap(), original);
        assert_ne!(store.get_key_material(&handle.key_id, 2).await.unwrap(), original);
    }

    #[tokio::test]
    async fn test_unknown_key_and_version() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        let handle = store.generate_key().await.unwrap();

        assert!(matches!(store.rotate_key("missing").await, Err(KmsError::NotFound(_))));
        assert!(matches!(store.get_metadata("missing").await, Err(KmsError::NotFound(_))));
        assert!(matches!(
            store.get_key_material(&handle.key_id, 2).await,
            Err(KmsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let (key_id, material) = {
            let store = open(&dir).await;
            let handle = store.generate_key().await.unwrap();
            store.rotate_key(&handle.key_id).await.unwrap();
            let material = store.get_key_material(&handle.key_id, 2).await.unwrap();
            (handle.key_id, material)
        };

        let reopened = open(&dir).await;
        assert_eq!(reopened.get_metadata(&key_id).await.unwrap().versions.len(), 2);
        assert_eq!(reopened.get_key_material(&key_id, 2).await.unwrap(), material);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_reset() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(SNAPSHOT_FILE), b"{ not json").unwrap();

        let store = open(&dir).await;
        assert!(store.list_keys().await.unwrap().is_empty());

        let content = std::fs::read_to_string(store.snapshot_path()).unwrap();
        assert!(serde_json::from_str::<Vec<KeyRecord>>(&content).is_ok());
    }

    #[tokio::test]
    async fn test_snapshot_with_two_active_versions_is_reset() {
        let dir = TempDir::new().unwrap();
        let json = r#"[{"keyId":"k","createdAt":1,"versions":[
            {"version":1,"createdAt":1,"status":"active","materialB64":"AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="},
            {"version":2,"createdAt":2,"status":"active","materialB64":"AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="}]}]"#;
        std::fs::write(dir.path().join(SNAPSHOT_FILE), json).unwrap();

        let store = open(&dir).await;
        assert!(store.list_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        store.generate_key().await.unwrap();
        store.generate_key().await.unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
        assert_eq!(store.list_keys().await.unwrap().len(), 2);
    }

    fn temp_files(dir: &TempDir) -> Vec<String> {
        std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.contains(".tmp-"))
            .collect()
    }

    #[tokio::test]
    async fn test_failed_persist_leaves_memory_unchanged() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        let handle = store.generate_key().await.unwrap();

        // A non-empty directory in place of the snapshot makes the rename fail
        let snapshot = store.snapshot_path().to_path_buf();
        std::fs::remove_file(&snapshot).unwrap();
        std::fs::create_dir(&snapshot).unwrap();
        std::fs::write(snapshot.join("occupied"), b"x").unwrap();

        assert!(store.rotate_key(&handle.key_id).await.is_err());
        assert!(store.generate_key().await.is_err());

        let metadata = store.get_metadata(&handle.key_id).await.unwrap();
        assert_eq!(metadata.versions.len(), 1);
        assert_eq!(store.active_version(&handle.key_id).await.unwrap().version, 1);
        assert_eq!(store.list_keys().await.unwrap(), vec![handle.key_id.clone()]);
        assert!(temp_files(&dir).is_empty());
    }

    #[tokio::test]
    async fn test_failed_write_keeps_previous_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        store.generate_key().await.unwrap();
        let before = std::fs::read(store.snapshot_path()).unwrap();

        // The temp path is an existing directory so the temp file cannot be created
        let blocked = dir.path().join(format!("{}.tmp-blocked", SNAPSHOT_FILE));
        std::fs::create_dir(&blocked).unwrap();
        let result = write_atomically(store.snapshot_path(), &blocked, b"[]").await;

        assert!(result.is_err());
        assert_eq!(std::fs::read(store.snapshot_path()).unwrap(), before);
        assert!(blocked.is_dir());
        assert_eq!(store.list_keys().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_write_atomically_replaces_content() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join(SNAPSHOT_FILE);
        std::fs::write(&target, b"old").unwrap();

        let tmp = dir.path().join(format!("{}.tmp-test", SNAPSHOT_FILE));
        write_atomically(&target, &tmp, b"new").await.unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"new");
        assert!(!tmp.exists());
    }

    #[tokio::test]
    async fn test_rotate_with_maximal_grace_period() {
        let dir = TempDir::new().unwrap();
        let store = LocalKeyStore::open(dir.path(), Duration::from_secs(u64::MAX))
            .await
            .unwrap();
        let handle = store.generate_key().await.unwrap();

        let rotated = store.rotate_key(&handle.key_id).await.unwrap();
        assert_eq!(rotated.version, 2);

        let metadata = store.get_metadata(&handle.key_id).await.unwrap();
        assert_eq!(metadata.versions.len(), 2);
        assert_eq!(metadata.versions[0].status, KeyVersionStatus::Deprecated);
        assert_eq!(metadata.versions[0].expires_at, Some(i64::MAX));
    }
}

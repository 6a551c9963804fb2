//! End-to-end key store behavior across restarts

use kms_config::KeyStoreConfig;
use kms_core::local_store::SNAPSHOT_FILE;
use kms_core::{init_key_store, KeyVersionStatus, KmsError};
use tempfile::TempDir;

fn config(dir: &TempDir) -> KeyStoreConfig {
    KeyStoreConfig {
        path: dir.path().to_string_lossy().into_owned(),
        rsa_bits: 1024,
        grace_period_secs: 7 * 24 * 60 * 60,
    }
}

#[tokio::test]
async fn test_rotations_survive_restart() {
    let dir = TempDir::new().unwrap();
    let keys = init_key_store(&config(&dir)).await.unwrap();

    let handle = keys.generate_key().await.unwrap();
    let sealed_v1 = keys.wrap(&handle.key_id, None, b"first", None).await.unwrap();
    for expected in 2..=4 {
        let rotated = keys.rotate_key(&handle.key_id).await.unwrap();
        assert_eq!(rotated.version, expected);
    }
    drop(keys);

    let reopened = init_key_store(&config(&dir)).await.unwrap();
    let metadata = reopened.get_metadata(&handle.key_id).await.unwrap();
    let numbers: Vec<u32> = metadata.versions.iter().map(|v| v.version).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4]);

    let active: Vec<_> = metadata
        .versions
        .iter()
        .filter(|v| v.status == KeyVersionStatus::Active)
        .collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].version, 4);
    assert!(metadata.versions[..3].iter().all(|v| v.expires_at.is_some()));

    // Deprecated material is still served
    let plaintext = reopened
        .unwrap(&handle.key_id, 1, &sealed_v1.ciphertext, &sealed_v1.nonce, &sealed_v1.tag, None)
        .await
        .unwrap();
    assert_eq!(plaintext, b"first");
}

#[tokio::test]
async fn test_snapshot_is_json_array_without_temp_files() {
    let dir = TempDir::new().unwrap();
    let keys = init_key_store(&config(&dir)).await.unwrap();
    let first = keys.generate_key().await.unwrap();
    let second = keys.generate_key().await.unwrap();
    keys.rotate_key(&first.key_id).await.unwrap();

    let raw = std::fs::read_to_string(dir.path().join(SNAPSHOT_FILE)).unwrap();
    let snapshot: serde_json::Value = serde_json::from_str(&raw).unwrap();
    let records = snapshot.as_array().unwrap();
    assert_eq!(records.len(), 2);
    let ids: Vec<&str> = records.iter().map(|r| r["keyId"].as_str().unwrap()).collect();
    assert!(ids.contains(&first.key_id.as_str()));
    assert!(ids.contains(&second.key_id.as_str()));

    let leftovers = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().contains(".tmp"))
        .count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_corrupt_snapshot_resets_store() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(SNAPSHOT_FILE), b"[{\"keyId\": tru").unwrap();

    let keys = init_key_store(&config(&dir)).await.unwrap();
    assert!(keys.list_keys().await.unwrap().is_empty());

    let raw = std::fs::read_to_string(dir.path().join(SNAPSHOT_FILE)).unwrap();
    assert_eq!(serde_json::from_str::<serde_json::Value>(&raw).unwrap(), serde_json::json!([]));
}

#[tokio::test]
async fn test_unknown_key_operations() {
    let dir = TempDir::new().unwrap();
    let keys = init_key_store(&config(&dir)).await.unwrap();

    assert!(matches!(keys.rotate_key("missing").await, Err(KmsError::NotFound(_))));
    assert!(matches!(keys.get_metadata("missing").await, Err(KmsError::NotFound(_))));
    assert!(matches!(
        keys.get_key_material("missing", 1).await,
        Err(KmsError::NotFound(_))
    ));
}

//! End-to-end session lifecycle
//!
//! Drives the handshake through RSA wrap/unwrap, then token rotation,
//! replacement, expiry and the background sweeper.

use kms_core::crypto::{aead_decrypt, aead_encrypt, wrap_with_public_key, HandshakeKeyPair};
use kms_core::{KmsError, SessionKey, SessionManager};
use std::sync::Arc;
use std::time::Duration;

fn token(seed: char) -> String {
    std::iter::repeat(seed).take(43).collect()
}

#[tokio::test]
async fn test_handshake_then_expiry() {
    let sessions = SessionManager::new(Duration::from_secs(900), true, None);
    let pair = HandshakeKeyPair::generate(1024).unwrap();

    let sid = sessions.create_pending_session();
    let client_key = [0x42u8; 32];
    let wrapped = wrap_with_public_key(pair.public_key_pem(), &client_key).unwrap();
    let server_key = pair.unwrap_session_key(&wrapped).unwrap();
    assert_eq!(server_key, client_key);

    let tok = token('t');
    sessions
        .complete_handshake(&sid, &tok, SessionKey::from_bytes(server_key), Duration::from_millis(1000))
        .await
        .unwrap();

    let session = sessions.lookup(&tok).await.unwrap();
    assert_eq!(session.session_id, sid);

    // Both sides now share the key
    let sealed = aead_encrypt(b"over the wire", &client_key, None).unwrap();
    let opened = aead_decrypt(&sealed.ciphertext, &sealed.nonce, &sealed.tag, session.key.as_bytes(), None)
        .unwrap();
    assert_eq!(opened, b"over the wire");

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(sessions.lookup(&tok).await.is_none());
}

#[tokio::test]
async fn test_rotation_keeps_session_key() {
    let sessions = SessionManager::new(Duration::from_secs(900), true, Some("kms".to_string()));
    let old = format!("kms_{}", token('o'));
    sessions
        .complete_handshake("sid-1", &old, SessionKey::from_bytes([7; 32]), sessions.default_ttl())
        .await
        .unwrap();

    let rotation = sessions.rotate_token(&old).await.unwrap();
    assert!(rotation.new_token.starts_with("kms_"));
    assert!(sessions.is_valid_token(&rotation.new_token));

    assert!(sessions.lookup(&old).await.is_none());
    let session = sessions.lookup(&rotation.new_token).await.unwrap();
    assert_eq!(session.session_id, "sid-1");
    assert_eq!(session.key, SessionKey::from_bytes([7; 32]));

    // Rotating a retired token fails
    assert!(matches!(
        sessions.rotate_token(&old).await,
        Err(KmsError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_replace_conflict_leaves_both_sessions() {
    let sessions = SessionManager::new(Duration::from_secs(900), true, None);
    let ttl = sessions.default_ttl();
    sessions
        .complete_handshake("sid-a", &token('a'), SessionKey::from_bytes([1; 32]), ttl)
        .await
        .unwrap();
    sessions
        .complete_handshake("sid-b", &token('b'), SessionKey::from_bytes([2; 32]), ttl)
        .await
        .unwrap();

    let result = sessions.replace_token(&token('a'), &token('b')).await;
    assert!(matches!(result, Err(KmsError::Conflict(_))));

    assert_eq!(sessions.lookup(&token('a')).await.unwrap().session_id, "sid-a");
    assert_eq!(sessions.lookup(&token('b')).await.unwrap().session_id, "sid-b");

    let replaced = sessions.replace_token(&token('a'), &token('c')).await.unwrap();
    assert_eq!(replaced.new_token, token('c'));
    assert!(sessions.lookup(&token('a')).await.is_none());
    assert_eq!(sessions.lookup(&token('c')).await.unwrap().session_id, "sid-a");
}

#[tokio::test]
async fn test_sweeper_evicts_and_stops() {
    let sessions = Arc::new(SessionManager::new(Duration::from_secs(900), true, None));
    for (i, seed) in ['a', 'b', 'c'].into_iter().enumerate() {
        sessions
            .complete_handshake(
                &format!("sid-{}", i),
                &token(seed),
                SessionKey::from_bytes([i as u8; 32]),
                Duration::from_millis(50),
            )
            .await
            .unwrap();
    }
    sessions
        .complete_handshake("keeper", &token('k'), SessionKey::from_bytes([9; 32]), Duration::from_secs(60))
        .await
        .unwrap();

    let sweeper = sessions.spawn_sweeper_every(Duration::from_millis(25));
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Swept without any lookup touching the expired records
    assert_eq!(sessions.len().await, 1);
    assert!(sessions.lookup(&token('k')).await.is_some());

    sweeper.shutdown().await;
}

//! Session lifecycle manager
//!
//! Maps bearer tokens to symmetric session keys negotiated during the RSA
//! handshake. Expired records are dead on read (lazy eviction) and physically
//! removed by a periodic sweeper task.
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
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use kms_config::SessionConfig;
use rand::RngCore;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub type SessionId = String;
pub type ClientToken = String;

const TOKEN_ENTROPY_BYTES: usize = 32;
const MIN_TOKEN_BODY_LEN: usize = 22;
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// 256-bit symmetric session key
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey([REDACTED])")
    }
}

struct SessionRecord {
    session_id: SessionId,
    client_token: ClientToken,
    key: SessionKey,
    created_at: i64,
    expires_at: i64,
}

impl SessionRecord {
    fn is_active(&self, now: i64) -> bool {
        self.expires_at > now
    }

    fn view(&self) -> ActiveSession {
        ActiveSession {
            session_id: self.session_id.clone(),
            key: self.key.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

/// Snapshot of an active session handed to callers for one operation
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub session_id: SessionId,
    pub key: SessionKey,
    pub created_at: i64,
    pub expires_at: i64,
}

/// Result of a token rotation or replacement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRotation {
    pub new_token: ClientToken,
    pub expires_at: i64,
}

/// Records keyed by session id, plus a token index into them
#[derive(Default)]
struct SessionMaps {
    by_session_id: HashMap<SessionId, SessionRecord>,
    by_token: HashMap<ClientToken, SessionId>,
}

impl SessionMaps {
    fn insert(&mut self, record: SessionRecord) {
        self.by_token
            .insert(record.client_token.clone(), record.session_id.clone());
        self.by_session_id.insert(record.session_id.clone(), record);
    }

    /// Remove a record and whichever token entry still points at it
    fn remove(&mut self, session_id: &str) -> Option<SessionRecord> {
        let record = self.by_session_id.remove(session_id)?;
        if self.by_token.get(&record.client_token).map(String::as_str) == Some(session_id) {
            self.by_token.remove(&record.client_token);
        }
        Some(record)
    }

    /// Resolve a token to an active session id, evicting it if expired
    fn resolve(&mut self, token: &str, now: i64) -> Option<SessionId> {
        let session_id = self.by_token.get(token)?.clone();
        match self.by_session_id.get(&session_id) {
            Some(record) if record.is_active(now) => Some(session_id),
            Some(_) => {
                self.remove(&session_id);
                debug!(session_id = %session_id, "Evicted expired session on access");
                None
            }
            None => {
                self.by_token.remove(token);
                None
            }
        }
    }

    fn remap(
        &mut self,
        session_id: &str,
        new_token: ClientToken,
        renewed_expiry: Option<i64>,
    ) -> Option<TokenRotation> {
        let record = self.by_session_id.get_mut(session_id)?;
        self.by_token.remove(&record.client_token);
        record.client_token = new_token.clone();
        if let Some(expires_at) = renewed_expiry {
            record.expires_at = expires_at;
        }
        let expires_at = record.expires_at;
        self.by_token.insert(new_token.clone(), session_id.to_string());

        Some(TokenRotation {
            new_token,
            expires_at,
        })
    }
}

/// Owns every session record; callers only ever see `ActiveSession` copies
pub struct SessionManager {
    maps: Mutex<SessionMaps>,
    ttl: Duration,
    sliding: bool,
    token_prefix: Option<String>,
}

impl SessionManager {
    pub fn new(ttl: Duration, sliding: bool, token_prefix: Option<String>) -> Self {
        Self {
            maps: Mutex::new(SessionMaps::default()),
            ttl,
            sliding,
            token_prefix,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(
            Duration::from_millis(config.ttl_ms),
            config.sliding,
            config.token_prefix.clone(),
        )
    }

    /// Configured session lifetime
    pub fn default_ttl(&self) -> Duration {
        self.ttl
    }

    /// Period of the background sweep: `max(10s, ttl / 3)`
    pub fn sweep_interval(&self) -> Duration {
        (self.ttl / 3).max(MIN_SWEEP_INTERVAL)
    }

    /// Fresh session identifier; no record is created until the handshake completes
    pub fn create_pending_session(&self) -> SessionId {
        uuid::Uuid::new_v4().to_string()
    }

    /// Bind `client_token` to `key` for `ttl`.
    ///
    /// Any record already bound to the same token or the same session id is
    /// replaced unconditionally.
    pub async fn complete_handshake(
        &self,
        session_id: &str,
        client_token: &str,
        key: SessionKey,
        ttl: Duration,
    ) -> KmsResult<ActiveSession> {
        if session_id.trim().is_empty() {
            return Err(KmsError::InvalidFormat("session id is empty".to_string()));
        }
        if !self.is_valid_token(client_token) {
            return Err(KmsError::InvalidFormat("invalid client token format".to_string()));
        }

        let now = now_ms();
        let record = SessionRecord {
            session_id: session_id.to_string(),
            client_token: client_token.to_string(),
            key,
            created_at: now,
            expires_at: now.saturating_add(duration_ms(ttl)),
        };
        let view = record.view();

        let mut maps = self.maps.lock().await;
        if let Some(previous_id) = maps.by_token.get(client_token).cloned() {
            if previous_id != session_id {
                if let Some(previous) = maps.remove(&previous_id) {
                    warn!(
                        session_id = %session_id,
                        displaced_session_id = %previous.session_id,
                        was_active = previous.is_active(now),
                        "Handshake replaced a session bound to the same token"
                    );
                }
            }
        }
        if maps.remove(session_id).is_some() {
            debug!(session_id = %session_id, "Handshake re-keyed existing session");
        }
        maps.insert(record);
        drop(maps);

        info!(
            session_id = %view.session_id,
            expires_at = view.expires_at,
            "Session handshake completed"
        );
        Ok(view)
    }

    /// Active session for `token`; an expired record is evicted and `None` returned
    pub async fn lookup(&self, token: &str) -> Option<ActiveSession> {
        let now = now_ms();
        let mut maps = self.maps.lock().await;
        let session_id = maps.resolve(token, now)?;
        maps.by_session_id.get(&session_id).map(SessionRecord::view)
    }

    /// Replace `old_token` with a freshly generated token
    pub async fn rotate_token(&self, old_token: &str) -> KmsResult<TokenRotation> {
        let now = now_ms();
        let mut maps = self.maps.lock().await;
        let session_id = maps
            .resolve(old_token, now)
            .ok_or_else(|| KmsError::NotFound("no active session for token".to_string()))?;

        let mut new_token = self.generate_token();
        while maps.by_token.contains_key(&new_token) {
            new_token = self.generate_token();
        }

        let rotation = maps
            .remap(&session_id, new_token, self.renewed_expiry(now))
            .ok_or_else(|| KmsError::NotFound("no active session for token".to_string()))?;
        drop(maps);

        info!(
            session_id = %session_id,
            expires_at = rotation.expires_at,
            "Client token rotated"
        );
        Ok(rotation)
    }

    /// Replace `old_token` with a caller-chosen token.
    ///
    /// An unknown `old_token` is `NotFound` regardless of the desired token.
    /// Otherwise fails without touching any binding when the desired token is
    /// malformed or already names a different active session.
    pub async fn replace_token(
        &self,
        old_token: &str,
        desired_token: &str,
    ) -> KmsResult<TokenRotation> {
        let now = now_ms();
        let mut maps = self.maps.lock().await;
        let session_id = maps
            .resolve(old_token, now)
            .ok_or_else(|| KmsError::NotFound("no active session for token".to_string()))?;

        if !self.is_valid_token(desired_token) {
            return Err(KmsError::InvalidFormat("invalid token format".to_string()));
        }

        if let Some(owner) = maps.resolve(desired_token, now) {
            if owner != session_id {
                warn!(session_id = %session_id, "Desired token already bound to another session");
                return Err(KmsError::Conflict("desired token already in use".to_string()));
            }
        }

        let rotation = maps
            .remap(&session_id, desired_token.to_string(), self.renewed_expiry(now))
            .ok_or_else(|| KmsError::NotFound("no active session for token".to_string()))?;
        drop(maps);

        info!(
            session_id = %session_id,
            expires_at = rotation.expires_at,
            "Client token replaced"
        );
        Ok(rotation)
    }

    /// Physically remove every expired record; returns how many were evicted
    pub async fn garbage_collect(&self) -> usize {
        let now = now_ms();
        let mut maps = self.maps.lock().await;
        let expired: Vec<SessionId> = maps
            .by_session_id
            .values()
            .filter(|record| !record.is_active(now))
            .map(|record| record.session_id.clone())
            .collect();

        for session_id in &expired {
            maps.remove(session_id);
        }
        expired.len()
    }

    /// Number of records held, including expired ones not yet swept
    pub async fn len(&self) -> usize {
        self.maps.lock().await.by_session_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Optional `<prefix>_` followed by at least 22 base64url characters
    pub fn is_valid_token(&self, token: &str) -> bool {
        let body = match &self.token_prefix {
            Some(prefix) => token
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix('_'))
                .unwrap_or(token),
            None => token,
        };

        body.len() >= MIN_TOKEN_BODY_LEN
            && body
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    }

    /// Start the periodic sweep at `sweep_interval()`
    pub fn spawn_sweeper(self: &Arc<Self>) -> SweeperHandle {
        self.spawn_sweeper_every(self.sweep_interval())
    }

    /// Start the periodic sweep at a custom period.
    ///
    /// The task holds only a weak reference and stops on its own once the
    /// manager is dropped.
    pub fn spawn_sweeper_every(self: &Arc<Self>, period: Duration) -> SweeperHandle {
        let manager: Weak<SessionManager> = Arc::downgrade(self);
        let cancel = CancellationToken::new();
        let stop = cancel.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(manager) = manager.upgrade() else { break };
                        let evicted = manager.garbage_collect().await;
                        if evicted > 0 {
                            info!(evicted = evicted, "Swept expired sessions");
                        }
                    }
                }
            }
            debug!("Session sweeper stopped");
        });

        info!(period_ms = period.as_millis() as u64, "Session sweeper started");
        SweeperHandle { cancel, task }
    }

    fn renewed_expiry(&self, now: i64) -> Option<i64> {
        self.sliding
            .then(|| now.saturating_add(duration_ms(self.ttl)))
    }

    fn generate_token(&self) -> ClientToken {
        let mut bytes = [0u8; TOKEN_ENTROPY_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let body = URL_SAFE_NO_PAD.encode(bytes);
        match &self.token_prefix {
            Some(prefix) => format!("{}_{}", prefix, body),
            None => body,
        }
    }
}

/// Handle to the background sweeper task
pub struct SweeperHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for it to exit
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Session sweeper task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

//! Health check endpoint
//!
//! Provides HTTP health check endpoint for orchestration and monitoring.
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


use super::{data, Data};
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};
use tracing::warn;

/// Health check handler
pub async fn health_check(State(state): State<AppState>) -> Json<Data<Value>> {
    let keys = match state.keys.list_keys().await {
        Ok(ids) => ids.len(),
        Err(e) => {
            warn!(error = %e, "Unable to count keys for health check");
            0
        }
    };

    data(json!({
        "ok": true,
        "service": "kms-gateway",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.sessions.len().await,
        "keys": keys,
    }))
}

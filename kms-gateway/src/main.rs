//! KMS Gateway
//!
//! Serves the session handshake, symmetric crypto and data-key management
//! API over HTTP.
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


use anyhow::{Context, Result};
use kms_config::{AppConfig, LogFormat};
use kms_gateway::{AppState, KmsServer};
use kms_logging::init_logging;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    // Initialize logging
    init_logging(
        "kms-gateway",
        config.log_level(),
        config.log_format == LogFormat::Json,
    );

    info!(
        port = config.port,
        key_store_path = config.key_store_path(),
        session_ttl_ms = config.session.ttl_ms,
        "Configuration loaded"
    );

    // Unreadable or unwritable key storage is fatal
    let state = match AppState::from_config(&config).await {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, code = e.code(), "Failed to initialize key storage");
            return Err(e).context("Failed to initialize KMS state");
        }
    };

    KmsServer::new(config.port, state).start().await?;

    info!("KMS Gateway stopped");
    Ok(())
}

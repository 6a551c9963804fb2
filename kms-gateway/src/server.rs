//! HTTP server lifecycle
//!
//! Binds the gateway router, runs the background maintenance tasks and shuts
//! everything down on Ctrl+C or SIGTERM.
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


use crate::routes::router;
use crate::state::AppState;
use kms_core::RateLimiters;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// How often ended rate-limit windows are purged
const LIMITER_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// KMS gateway server
pub struct KmsServer {
    port: u16,
    state: AppState,
}

impl KmsServer {
    pub fn new(port: u16, state: AppState) -> Self {
        Self { port, state }
    }

    /// Serve until Ctrl+C or SIGTERM
    pub async fn start(self) -> anyhow::Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind KMS gateway to {}: {}", addr, e))?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let sweeper = self.state.sessions.spawn_sweeper();
        let maintenance_cancel = CancellationToken::new();
        let maintenance = spawn_limiter_maintenance(
            self.state.limiters.clone(),
            LIMITER_SWEEP_INTERVAL,
            maintenance_cancel.clone(),
        );

        let app = router(self.state);
        info!(
            addr = %listener.local_addr()?,
            "KMS gateway started"
        );

        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;

        maintenance_cancel.cancel();
        if let Err(e) = maintenance.await {
            error!(error = %e, "Limiter maintenance task ended abnormally");
        }
        sweeper.shutdown().await;

        result.map_err(|e| anyhow::anyhow!("KMS gateway server error: {}", e))?;
        info!("KMS gateway stopped");
        Ok(())
    }
}

/// Periodically drop rate-limit buckets whose window has ended
fn spawn_limiter_maintenance(
    limiters: Arc<RateLimiters>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let purged = limiters.sweep().await;
                    if purged > 0 {
                        debug!(purged = purged, "Purged ended rate-limit windows");
                    }
                }
            }
        }
    })
}

/// Graceful shutdown signal handler
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Shutdown signal (Ctrl+C) received");
        },
        _ = terminate => {
            info!("Shutdown signal (SIGTERM) received");
        },
    }
}

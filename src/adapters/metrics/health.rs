//! Health Check Server - Liveness and Readiness Checks
//!
//! Exposes /live and /ready endpoints via axum 0.7 for container health
//! checks. Readiness requires the market state to be restored (or
//! bootstrapped) and the service not to be shutting down.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use tokio::sync::broadcast;
use tracing::{info, instrument};

/// Shared health state polled by readiness checks.
#[derive(Debug)]
pub struct HealthState {
    /// Market state has been restored from a snapshot or bootstrapped.
    restored: AtomicBool,
    /// Graceful shutdown has started.
    shutting_down: AtomicBool,
}

impl HealthState {
    /// Create a new health state: alive, not ready yet.
    pub fn new() -> Self {
        Self {
            restored: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn mark_restored(&self) {
        self.restored.store(true, Ordering::Relaxed);
    }

    pub fn mark_shutting_down(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
    }

    /// Check if the service is ready to serve traffic.
    pub fn is_ready(&self) -> bool {
        self.restored.load(Ordering::Relaxed) && !self.shutting_down.load(Ordering::Relaxed)
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

/// Axum-based health check HTTP server.
pub struct HealthServer {
    /// Health state shared with the wiring code.
    state: Arc<HealthState>,
    /// Bind port.
    port: u16,
}

impl HealthServer {
    pub fn new(state: Arc<HealthState>, port: u16) -> Self {
        Self { state, port }
    }

    /// Health routes, without a listener.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/live", get(Self::liveness))
            .route("/ready", get(Self::readiness))
            .with_state(Arc::clone(&self.state))
    }

    /// Serve the health routes until shutdown.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let app = self.router();

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        info!(address = %addr, "Health server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    /// Liveness check: always returns 200 if the process is running.
    async fn liveness() -> impl IntoResponse {
        (StatusCode::OK, "OK")
    }

    /// Readiness check: 200 once restored, 503 before that and while stopping.
    async fn readiness(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
        if state.is_ready() {
            (StatusCode::OK, "READY")
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readiness_lifecycle() {
        let state = HealthState::new();
        assert!(!state.is_ready());

        state.mark_restored();
        assert!(state.is_ready());

        state.mark_shutting_down();
        assert!(!state.is_ready());
    }
}

//! Liveness endpoint for container orchestrators.
//!
//! `GET /health` answers 200 while passes keep succeeding and 503 once the
//! last success (or process start) is older than the staleness limit.

use crate::models::{Ps360Error, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, info};

const NEVER: u64 = u64::MAX;

/// Progress shared between the poller (writer) and the endpoint (reader).
#[derive(Debug)]
pub struct HealthState {
    started: Instant,
    started_at: DateTime<Utc>,
    stale_after: Duration,
    signed_in: AtomicBool,
    /// Milliseconds after `started` of the last successful pass
    last_success_ms: AtomicU64,
    passes: AtomicU64,
    failures: AtomicU64,
}

/// Body of the health response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub signed_in: bool,
    pub last_success: Option<DateTime<Utc>>,
    pub passes: u64,
    pub failures: u64,
    pub uptime_secs: u64,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == "ok"
    }
}

impl HealthState {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            started: Instant::now(),
            started_at: Utc::now(),
            stale_after,
            signed_in: AtomicBool::new(false),
            last_success_ms: AtomicU64::new(NEVER),
            passes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn set_signed_in(&self, signed_in: bool) {
        self.signed_in.store(signed_in, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        let elapsed = self.started.elapsed().as_millis() as u64;
        self.last_success_ms.store(elapsed, Ordering::Relaxed);
        self.passes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Current report; staleness is measured from process start until the
    /// first success.
    pub fn report(&self) -> HealthReport {
        let last_ms = self.last_success_ms.load(Ordering::Relaxed);
        let uptime = self.started.elapsed();

        let reference = if last_ms == NEVER {
            Duration::ZERO
        } else {
            Duration::from_millis(last_ms)
        };
        let healthy = uptime.saturating_sub(reference) <= self.stale_after;

        HealthReport {
            status: if healthy { "ok" } else { "stale" },
            signed_in: self.signed_in.load(Ordering::Relaxed),
            last_success: (last_ms != NEVER)
                .then(|| self.started_at + chrono::Duration::milliseconds(last_ms as i64)),
            passes: self.passes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            uptime_secs: uptime.as_secs(),
        }
    }
}

/// Health check endpoint.
pub async fn handle_health(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let report = state.report();
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .with_state(state)
}

/// Start the health server in the background.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_server(state: Arc<HealthState>, bind: &str) -> Result<SocketAddr> {
    let addr: SocketAddr = bind
        .parse()
        .map_err(|e| Ps360Error::ParseError(format!("Invalid health bind address {bind}: {e}")))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Ps360Error::io(format!("binding health endpoint {addr}"), e))?;
    let actual_addr = listener
        .local_addr()
        .map_err(|e| Ps360Error::io("reading health endpoint address", e))?;

    info!(addr = %actual_addr, "Health endpoint listening");

    let app = router(state);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Health endpoint stopped");
        }
    });

    Ok(actual_addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_healthy_at_startup() {
        let state = HealthState::new(Duration::from_secs(300));
        let report = state.report();
        assert!(report.is_healthy());
        assert!(report.last_success.is_none());
        assert!(!report.signed_in);
    }

    #[test]
    fn test_stale_without_success() {
        let state = HealthState::new(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(state.report().status, "stale");
    }

    #[test]
    fn test_success_counts_and_timestamp() {
        let state = HealthState::new(Duration::from_secs(60));
        state.set_signed_in(true);
        state.record_success();
        state.record_failure();
        let report = state.report();
        assert!(report.is_healthy());
        assert!(report.signed_in);
        assert_eq!(report.passes, 1);
        assert_eq!(report.failures, 1);
        assert!(report.last_success.is_some());
    }

    #[tokio::test]
    async fn test_endpoint_status_codes() {
        let healthy = Arc::new(HealthState::new(Duration::from_secs(60)));
        let addr = start_server(Arc::clone(&healthy), "127.0.0.1:0").await.unwrap();
        let response = reqwest::get(format!("http://{addr}/health")).await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let body = response.text().await.unwrap();
        assert!(body.contains(r#""status":"ok""#));

        let stale = Arc::new(HealthState::new(Duration::ZERO));
        tokio::time::sleep(Duration::from_millis(5)).await;
        let addr = start_server(stale, "127.0.0.1:0").await.unwrap();
        let response = reqwest::get(format!("http://{addr}/health")).await.unwrap();
        assert_eq!(response.status().as_u16(), 503);
    }
}

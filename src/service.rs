//! Session lifecycle: sign in, poll until the session ages out, sign out.
//!
//! Epistemic foundation:
//! - K_i: Sessions are recycled every `session_hours`
//! - B_i: Any session step may fail → log, wait, start a new session
//! - I^B: Shutdown may arrive at any await point → stop waiting, sign out

use crate::client::PowerscribeClient;
use crate::health::HealthState;
use crate::models::{Credentials, PassStats, PollingConfig, Result};
use crate::tracker::Poller;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info, warn};

/// How a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Ran for the full session duration
    Expired,
    /// Shutdown was requested
    Shutdown,
}

/// Ties the RAS client, the poller and the session schedule together.
pub struct Service {
    client: PowerscribeClient,
    poller: Poller,
    credentials: Credentials,
    polling: PollingConfig,
    health: Arc<HealthState>,
}

impl Service {
    pub fn new(
        client: PowerscribeClient,
        poller: Poller,
        credentials: Credentials,
        polling: PollingConfig,
        health: Arc<HealthState>,
    ) -> Self {
        Self {
            client,
            poller,
            credentials,
            polling,
            health,
        }
    }

    pub fn poller(&self) -> &Poller {
        &self.poller
    }

    /// Run sessions until shutdown is signalled.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        while !*shutdown.borrow() {
            info!("Starting new session");
            let outcome = self.run_session(&mut shutdown).await;
            self.sign_out().await;

            match outcome {
                Ok(SessionEnd::Expired) => info!("Session finished"),
                Ok(SessionEnd::Shutdown) => break,
                Err(e) => {
                    error!(error = %e, "An error occurred in the main loop");
                    info!(
                        retry_secs = self.polling.retry_delay_secs,
                        "Retrying after delay"
                    );
                    if sleep_or_shutdown(self.polling.retry_delay(), &mut shutdown).await {
                        break;
                    }
                }
            }
        }

        info!("Shutting down");
        Ok(())
    }

    /// One sign-in, one pass, one sign-out.
    pub async fn run_once(&mut self) -> Result<PassStats> {
        self.client.sign_in(&self.credentials).await?;
        self.health.set_signed_in(true);
        let result = self.poller.poll_once(&self.client).await;
        self.sign_out().await;
        result
    }

    async fn run_session(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<SessionEnd> {
        tokio::select! {
            signed_in = self.client.sign_in(&self.credentials) => { signed_in?; }
            _ = wait_for_shutdown(shutdown) => return Ok(SessionEnd::Shutdown),
        }
        self.health.set_signed_in(true);

        let session_duration = self.polling.session_duration();
        let started = Instant::now();

        while started.elapsed() < session_duration {
            tokio::select! {
                pass = self.poller.poll_once(&self.client) => { pass?; }
                _ = wait_for_shutdown(shutdown) => return Ok(SessionEnd::Shutdown),
            }

            if sleep_or_shutdown(self.polling.interval(), shutdown).await {
                return Ok(SessionEnd::Shutdown);
            }
        }

        Ok(SessionEnd::Expired)
    }

    /// Sign out, logging rather than propagating failures.
    async fn sign_out(&mut self) {
        if self.client.is_signed_in() {
            if let Err(e) = self.client.sign_out().await {
                warn!(error = %e, "Sign-out failed; dropping session");
            }
            // A session RAS refused to end is not reused either
            self.client.forget_session();
        }
        self.health.set_signed_in(false);
    }
}

/// Resolves once shutdown is requested. Never resolves if the sender is gone.
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Sleep for `duration`; true if shutdown was requested meanwhile.
pub async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = wait_for_shutdown(shutdown) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes_without_shutdown() {
        let (_tx, mut rx) = watch::channel(false);
        assert!(!sleep_or_shutdown(Duration::from_secs(60), &mut rx).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_sleep() {
        let (tx, mut rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            tx.send(true).unwrap();
        });
        assert!(sleep_or_shutdown(Duration::from_secs(3600), &mut rx).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_sender_is_not_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        assert!(!sleep_or_shutdown(Duration::from_secs(5), &mut rx).await);
    }

    #[tokio::test]
    async fn test_already_signalled() {
        let (_tx, mut rx) = watch::channel(true);
        wait_for_shutdown(&mut rx).await;
    }
}

//! One poll pass: browse orders, fetch their events, upload changed users.
//!
//! Epistemic foundation:
//! - K_i: The browse window is [cursor, now]; the cursor only moves after
//!   every event in the window has been folded into the registry
//! - B_i: Any RAS call may fail → the pass aborts and the window is retried
//! - B_i: The upload may fail → users stay dirty and are retried

use crate::client::PowerscribeClient;
use crate::health::HealthState;
use crate::models::{OrderSummary, PassStats, PollingConfig, ReportEvent, Result};
use crate::store::EventSink;
use crate::tracker::{CheckpointManager, TrackerState, UserRegistry};
use chrono::{DateTime, FixedOffset, Local, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Drives poll passes and owns the tracked state.
pub struct Poller {
    registry: UserRegistry,
    cursor: DateTime<FixedOffset>,
    sink: Arc<dyn EventSink>,
    health: Arc<HealthState>,
    checkpoint: Option<CheckpointManager>,
    page_size: u32,
    max_pages: u32,
    concurrency: usize,
}

impl Poller {
    /// Create a poller, resuming from the checkpoint when one exists.
    pub fn new(
        polling: &PollingConfig,
        sink: Arc<dyn EventSink>,
        health: Arc<HealthState>,
        checkpoint: Option<CheckpointManager>,
    ) -> Result<Self> {
        let resumed = match &checkpoint {
            Some(manager) => {
                let state = manager.load()?;
                if let Some(state) = &state {
                    info!(
                        path = %manager.path().display(),
                        cursor = %state.cursor,
                        users = state.registry.len(),
                        "Resumed from checkpoint"
                    );
                }
                state
            }
            None => None,
        };

        let (registry, cursor) = match resumed {
            Some(state) => (state.registry, state.cursor),
            None => (
                UserRegistry::new(),
                now() - chrono::Duration::minutes(polling.lookback_minutes),
            ),
        };

        Ok(Self {
            registry,
            cursor,
            sink,
            health,
            checkpoint,
            page_size: polling.page_size.max(1),
            max_pages: polling.max_pages.max(1),
            concurrency: polling.concurrency.max(1),
        })
    }

    pub fn cursor(&self) -> DateTime<FixedOffset> {
        self.cursor
    }

    pub fn registry(&self) -> &UserRegistry {
        &self.registry
    }

    /// Run one pass against a signed-in client.
    pub async fn poll_once(&mut self, client: &PowerscribeClient) -> Result<PassStats> {
        let result = self.run_pass(client).await;
        match &result {
            Ok(_) => self.health.record_success(),
            Err(_) => self.health.record_failure(),
        }
        result
    }

    async fn run_pass(&mut self, client: &PowerscribeClient) -> Result<PassStats> {
        let start = Instant::now();
        let to = now();
        let mut stats = PassStats::default();

        let orders = self.browse_window(client, &to).await?;
        stats.orders = orders.len();
        info!(
            orders = orders.len(),
            since = %self.cursor,
            "Found updated orders"
        );

        let mut signed = Vec::with_capacity(orders.len());
        for order in &orders {
            if order.signer.is_some() {
                signed.push(order.report_id);
            } else {
                debug!(
                    report_id = order.report_id,
                    accession = order.accession.as_deref().unwrap_or("-"),
                    last_modified = order.last_modified.as_deref().unwrap_or("-"),
                    "Skipping unsigned order"
                );
            }
        }
        stats.reports_scanned = signed.len();

        let events: Vec<Vec<ReportEvent>> = stream::iter(signed)
            .map(|report_id| client.get_report_events(report_id))
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        for event in events.iter().flatten() {
            stats.events_seen += 1;
            if let Some(user) = self.registry.observe(event) {
                stats.events_applied += 1;
                info!(
                    timestamp = %user.last_event.timestamp,
                    event_type = %user.last_event.event_type,
                    user = %user.name,
                    user_id = user.id,
                    workstation = %user.last_event.workstation,
                    additional_info = %user.last_event.additional_info,
                    "User activity"
                );
            }
        }

        self.cursor = to;
        self.save_checkpoint()?;

        stats.users_uploaded = self.upload_pending().await?;
        stats.duration = start.elapsed();

        debug!(
            reports = stats.reports_scanned,
            events = stats.events_seen,
            applied = stats.events_applied,
            uploaded = stats.users_uploaded,
            duration_ms = stats.duration.as_millis() as u64,
            "Pass complete"
        );
        Ok(stats)
    }

    /// All orders in `[cursor, to]`, following pages until a short one.
    async fn browse_window(
        &self,
        client: &PowerscribeClient,
        to: &DateTime<FixedOffset>,
    ) -> Result<Vec<OrderSummary>> {
        let mut orders = Vec::new();
        for page in 1..=self.max_pages {
            let batch = client
                .browse_orders(&self.cursor, to, self.page_size, page)
                .await?;
            let full_page = batch.len() >= self.page_size as usize;
            orders.extend(batch);
            if !full_page {
                break;
            }
            if page == self.max_pages {
                warn!(pages = page, "Page limit reached; remaining orders skipped");
            }
        }
        Ok(orders)
    }

    /// Upload dirty users; they stay dirty if the sink fails.
    async fn upload_pending(&mut self) -> Result<u64> {
        let pending = self.registry.pending_updates();
        if pending.is_empty() {
            return Ok(0);
        }

        let updated = self.sink.upload(&pending).await?;
        self.registry.mark_uploaded(pending.iter().map(|u| &u.id));
        self.save_checkpoint()?;
        Ok(updated)
    }

    fn save_checkpoint(&self) -> Result<()> {
        let Some(manager) = &self.checkpoint else {
            return Ok(());
        };
        manager.save(&TrackerState {
            cursor: self.cursor,
            registry: self.registry.clone(),
            updated_at: Utc::now(),
        })
    }
}

fn now() -> DateTime<FixedOffset> {
    Local::now().fixed_offset()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ReportEvent, parse_xs_datetime};
    use crate::store::LogSink;
    use std::time::Duration;
    use tempfile::TempDir;

    fn health() -> Arc<HealthState> {
        Arc::new(HealthState::new(Duration::from_secs(60)))
    }

    #[test]
    fn test_fresh_cursor_uses_lookback() {
        let polling = PollingConfig {
            lookback_minutes: 30,
            ..Default::default()
        };
        let poller = Poller::new(&polling, Arc::new(LogSink), health(), None).unwrap();
        let behind = now() - poller.cursor();
        assert!(behind >= chrono::Duration::minutes(30));
        assert!(behind < chrono::Duration::minutes(31));
        assert!(poller.registry().is_empty());
    }

    #[test]
    fn test_resumes_from_checkpoint() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.json");
        let cursor = parse_xs_datetime("2024-05-01T11:00:00+12:00").unwrap();

        let mut registry = UserRegistry::new();
        registry.observe(&ReportEvent {
            event_type: "Edit".into(),
            event_time: parse_xs_datetime("2024-05-01T10:00:00+12:00").unwrap(),
            workstation: "WS1".into(),
            additional_info: String::new(),
            account_id: 3,
            account_name: "Three".into(),
        });
        CheckpointManager::new(&path)
            .unwrap()
            .save(&TrackerState {
                cursor,
                registry,
                updated_at: Utc::now(),
            })
            .unwrap();

        let poller = Poller::new(
            &PollingConfig::default(),
            Arc::new(LogSink),
            health(),
            Some(CheckpointManager::new(&path).unwrap()),
        )
        .unwrap();
        assert_eq!(poller.cursor(), cursor);
        assert_eq!(poller.registry().pending_count(), 1);
        assert_eq!(poller.checkpoint.as_ref().unwrap().path(), path.as_path());
    }
}

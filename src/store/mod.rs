//! Sinks for tracked user activity.
//!
//! K_i: A sink receives only users whose latest event changed.
//! B_i: The write may fail → Result; callers keep the users dirty.

mod postgres;

pub use postgres::*;

use crate::models::{Result, User};
use async_trait::async_trait;
use tracing::info;

/// Destination for users whose latest event changed.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Write the users' latest events. Returns the number of rows updated.
    async fn upload(&self, users: &[User]) -> Result<u64>;
}

/// Sink that only logs, for dry runs.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn upload(&self, users: &[User]) -> Result<u64> {
        for user in users {
            info!(
                user_id = user.id,
                event_type = %user.last_event.event_type,
                timestamp = %user.last_event.timestamp,
                workstation = %user.last_event.workstation,
                "Would update user"
            );
        }
        Ok(users.len() as u64)
    }
}

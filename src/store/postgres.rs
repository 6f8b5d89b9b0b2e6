//! PostgreSQL sink writing into the autotriage `users` table.

use crate::models::{Result, User};
use crate::store::EventSink;
use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing::{debug, info};

const UPDATE_USER_SQL: &str = "UPDATE users \
     SET ps360_last_event_type = $1, \
         ps360_last_event_timestamp = $2, \
         ps360_last_event_workstation = $3 \
     WHERE ps360 = $4";

/// Writes latest events onto existing `users` rows keyed by `ps360`.
///
/// Users without a matching row are left alone; nothing is inserted.
pub struct PostgresSink {
    pool: PgPool,
}

impl PostgresSink {
    /// Create a sink; no connection is made until the first upload.
    pub fn connect_lazy(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(30))
            .connect_lazy(url)?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl EventSink for PostgresSink {
    async fn upload(&self, users: &[User]) -> Result<u64> {
        if users.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut updated = 0u64;

        for user in users {
            let result = sqlx::query(UPDATE_USER_SQL)
                .bind(user.last_event.event_type.as_str())
                .bind(user.last_event.timestamp)
                .bind(&user.last_event.workstation)
                .bind(user.id)
                .execute(&mut *tx)
                .await?;

            if result.rows_affected() == 0 {
                debug!(user_id = user.id, name = %user.name, "No users row for account");
            }
            updated += result.rows_affected();
        }

        tx.commit().await?;
        info!(users = users.len(), rows = updated, "Uploaded user activity");
        Ok(updated)
    }
}

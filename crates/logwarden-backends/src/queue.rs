use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{OptionalExtension, params};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::trace;

use crate::db::Database;
use crate::error::Result;

/// How often an idle consumer re-checks the table for items pushed by
/// another process
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A named, blocking FIFO shared by producers and a single consumer
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Append a payload to the named queue
    async fn push(&self, queue: &str, payload: Value) -> Result<()>;

    /// Remove and return the oldest payload, waiting for one if the queue is
    /// empty. `Ok(None)` means the wait ended without an item.
    async fn blocking_pop(&self, queue: &str) -> Result<Option<Value>>;
}

/// Durable queue stored in the `queue_items` table
#[derive(Clone)]
pub struct SqliteQueue {
    db: Database,
    notify: Arc<Notify>,
    poll_interval: Duration,
}

impl SqliteQueue {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            notify: Arc::new(Notify::new()),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Number of items waiting in the named queue
    pub async fn len(&self, queue: &str) -> Result<u64> {
        let queue = queue.to_string();
        self.db
            .call(move |conn| {
                let n: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM queue_items WHERE queue = ?1",
                    params![queue],
                    |row| row.get(0),
                )?;
                Ok(n as u64)
            })
            .await
    }

    async fn try_pop(&self, queue: &str) -> Result<Option<Value>> {
        let queue = queue.to_string();
        self.db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let row: Option<(i64, String)> = tx
                    .query_row(
                        "SELECT id, payload FROM queue_items WHERE queue = ?1 ORDER BY id LIMIT 1",
                        params![queue],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;
                let Some((id, payload)) = row else {
                    return Ok(None);
                };
                tx.execute("DELETE FROM queue_items WHERE id = ?1", params![id])?;
                tx.commit()?;
                Ok(Some(serde_json::from_str(&payload)?))
            })
            .await
    }
}

#[async_trait]
impl WorkQueue for SqliteQueue {
    async fn push(&self, queue: &str, payload: Value) -> Result<()> {
        let queue = queue.to_string();
        let payload = serde_json::to_string(&payload)?;
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO queue_items (queue, payload, enqueued_at) VALUES (?1, ?2, ?3)",
                    params![queue, payload, Utc::now().timestamp_millis()],
                )?;
                Ok(())
            })
            .await?;
        self.notify.notify_one();
        Ok(())
    }

    async fn blocking_pop(&self, queue: &str) -> Result<Option<Value>> {
        loop {
            // Register interest before checking so a push between the check
            // and the wait is not lost.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.try_pop(queue).await? {
                return Ok(Some(item));
            }
            trace!(queue, "queue empty, waiting");
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

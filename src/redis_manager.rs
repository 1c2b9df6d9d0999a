//! Redis queue transport for grading jobs
//!
//! The grading queue is a single Redis list: the intake RPUSHes job
//! snapshots, workers BLPOP them. Delivery is at-least-once; a job that
//! fails mid-processing is considered handled, not requeued.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::jobs::GradingJob;

/// Redis key constants
pub mod keys {
    /// Grading job queue key
    pub const GRADING_QUEUE: &str = "grading:jobs";
}

/// Seam for publishing grading jobs; the intake only sees this.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Publish a job snapshot to the grading queue.
    async fn enqueue(&self, job: &GradingJob) -> Result<()>;
}

/// Queue endpoint over one managed Redis connection.
///
/// `pop_job` parks its connection in BLPOP for as long as the queue is
/// empty, so a consumer needs a `RedisManager` of its own; producers can
/// share one freely.
pub struct RedisManager {
    conn: ConnectionManager,
}

impl RedisManager {
    /// Connect using the REDIS_URL environment variable.
    /// Defaults to "redis://localhost:6379" if not set.
    pub async fn from_env() -> Result<Self> {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into());
        Self::with_url(&url).await
    }

    pub async fn with_url(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;
        let conn = connect_with_retry(&client).await;
        info!("Connected to Redis at {}", redis_url);
        Ok(Self { conn })
    }

    /// Block until the next grading job arrives.
    ///
    /// Malformed payloads are logged and skipped; transient connection
    /// failures back off and retry. This never returns an error in
    /// steady state, it just keeps waiting.
    pub async fn pop_job(&mut self) -> Result<GradingJob> {
        loop {
            let result: Option<(String, String)> =
                match self.conn.blpop(keys::GRADING_QUEUE, 0.0).await {
                    Ok(res) => res,
                    Err(e) => {
                        warn!("Redis BLPOP failed: {}. Retrying in 3 seconds...", e);
                        sleep(Duration::from_secs(3)).await;
                        continue;
                    }
                };

            if let Some((_, job_data)) = result {
                match serde_json::from_str::<GradingJob>(&job_data) {
                    Ok(job) => return Ok(job),
                    Err(e) => {
                        warn!("Failed to parse grading job: {}. Data: {}", e, job_data);
                        continue;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl JobQueue for RedisManager {
    async fn enqueue(&self, job: &GradingJob) -> Result<()> {
        let json = serde_json::to_string(job)?;
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(keys::GRADING_QUEUE, json)
            .await
            .with_context(|| format!("Failed to enqueue grading job {}", job.submission_id))?;
        Ok(())
    }
}

/// Get a managed Redis connection, retrying until the server is up.
/// The manager reconnects on its own after transient failures.
pub(crate) async fn connect_with_retry(client: &redis::Client) -> ConnectionManager {
    loop {
        match client.get_connection_manager().await {
            Ok(conn) => return conn,
            Err(e) => {
                warn!("Failed to connect to Redis: {}. Retrying in 3 seconds...", e);
                sleep(Duration::from_secs(3)).await;
            }
        }
    }
}

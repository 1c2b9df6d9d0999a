//! Durable submission records
//!
//! The submission row is the only shared mutable resource in the
//! pipeline: inserted once by the intake, updated twice by the worker
//! (grading entry, terminal exit). Writes are full overwrites; a
//! redelivered job may rewrite a terminal record with a fresh result.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::info;
use uuid::Uuid;

use crate::redis_manager::connect_with_retry;
use crate::submission::Submission;

/// Redis key prefix for submission records
const SUBMISSION_KEY_PREFIX: &str = "submission:";

/// Seam for submission persistence; the worker and intake only see this.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Persist a newly created submission.
    async fn insert(&self, submission: &Submission) -> Result<()>;

    /// Load a submission by id.
    async fn load(&self, id: Uuid) -> Result<Option<Submission>>;

    /// Overwrite a submission's full record.
    async fn save(&self, submission: &Submission) -> Result<()>;
}

/// Redis-backed store: one JSON document per submission, no expiry.
#[derive(Clone)]
pub struct RedisSubmissionStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisSubmissionStore {
    /// Connect using the REDIS_URL environment variable.
    /// Defaults to "redis://localhost:6379" if not set.
    pub async fn from_env() -> Result<Self> {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into());
        Self::with_url(&url).await
    }

    pub async fn with_url(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;
        let conn = connect_with_retry(&client).await;
        info!("Connected submission store to Redis at {}", redis_url);
        Ok(Self { conn })
    }

    fn submission_key(id: Uuid) -> String {
        format!("{}{}", SUBMISSION_KEY_PREFIX, id)
    }

    async fn write(&self, submission: &Submission) -> Result<()> {
        let json = serde_json::to_string(submission)?;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(Self::submission_key(submission.id), json)
            .await
            .with_context(|| format!("Failed to write submission {}", submission.id))?;
        Ok(())
    }
}

#[async_trait]
impl SubmissionStore for RedisSubmissionStore {
    async fn insert(&self, submission: &Submission) -> Result<()> {
        self.write(submission).await
    }

    async fn load(&self, id: Uuid) -> Result<Option<Submission>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(Self::submission_key(id))
            .await
            .with_context(|| format!("Failed to read submission {}", id))?;

        match raw {
            Some(json) => {
                let submission = serde_json::from_str(&json)
                    .with_context(|| format!("Corrupt submission record {}", id))?;
                Ok(Some(submission))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, submission: &Submission) -> Result<()> {
        self.write(submission).await
    }
}

//! Read-only client for the content catalog's test case endpoint
//!
//! Quests own their test cases; this client fetches them when a grading
//! request arrives without an inline list. A missing or unreachable
//! catalog degrades to an empty list, which grades as single-run mode.

use anyhow::Result;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::jobs::TestCasePayload;

/// Catalog view of a test case. The hidden flag gates learner-facing
/// display only; hidden cases grade exactly like visible ones.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseDto {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub expected_output: Option<String>,
    #[serde(default)]
    pub hidden: bool,
}

impl TestCaseDto {
    fn into_payload(self) -> TestCasePayload {
        TestCasePayload {
            description: self.description.unwrap_or_default(),
            input: self.input.unwrap_or_default(),
            expected_output: self.expected_output.unwrap_or_default(),
        }
    }
}

/// HTTP client for the content catalog's internal quest API
pub struct TestCaseSource {
    http: reqwest::Client,
    base_url: Option<String>,
}

impl TestCaseSource {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    /// Build from the CONTENT_SERVICE_URL environment variable. When it
    /// is unset every fetch yields an empty list.
    pub fn from_env() -> Self {
        let base_url = std::env::var("CONTENT_SERVICE_URL").ok();
        match &base_url {
            Some(url) => info!("Fetching test cases from content catalog at {}", url),
            None => info!("CONTENT_SERVICE_URL not set; grading without catalog test cases"),
        }
        Self::new(base_url)
    }

    /// Fetch the ordered test cases for a quest. Any failure degrades to
    /// an empty list rather than blocking intake.
    pub async fn fetch_for_quest(&self, quest_id: Uuid) -> Vec<TestCasePayload> {
        let Some(base) = &self.base_url else {
            return Vec::new();
        };

        let url = format!(
            "{}/api/internal/quests/{}/test-cases",
            base.trim_end_matches('/'),
            quest_id
        );

        match self.try_fetch(&url).await {
            Ok(cases) => cases.into_iter().map(TestCaseDto::into_payload).collect(),
            Err(e) => {
                warn!("Failed to fetch test cases for quest {}: {:#}", quest_id, e);
                Vec::new()
            }
        }
    }

    async fn try_fetch(&self, url: &str) -> Result<Vec<TestCaseDto>> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("content catalog returned {}", status);
        }
        Ok(response.json().await?)
    }
}

//! Submission lifecycle model
//!
//! A submission is the record of truth for one grading attempt. It is
//! created in `Pending` state by the intake, moved to `Grading` by the
//! worker right before the first sandbox call, and finishes in one of
//! the two terminal states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle state of a submission
///
/// States only move forward: `Pending -> Grading -> {Completed, Error}`.
/// There is no cancelled state; a redelivered job may overwrite a
/// terminal state with a fresh result (last write wins).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionStatus {
    Pending,
    Grading,
    Completed,
    Error,
}

impl SubmissionStatus {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, SubmissionStatus::Completed | SubmissionStatus::Error)
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubmissionStatus::Pending => "PENDING",
            SubmissionStatus::Grading => "GRADING",
            SubmissionStatus::Completed => "COMPLETED",
            SubmissionStatus::Error => "ERROR",
        };
        write!(f, "{}", s)
    }
}

/// A learner's code attempt for a quest, tracked through grading
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: Uuid,
    pub learner_id: Uuid,
    pub quest_id: Uuid,
    pub submitted_code: String,
    pub language: String,
    pub status: SubmissionStatus,
    pub success: bool,
    /// Aggregate score (0-100). Only populated by suite-mode grading;
    /// single-run grading leaves it empty.
    pub score: Option<f64>,
    pub stdout: String,
    pub stderr: String,
    /// Serialized per-case detail. Always a valid JSON document on
    /// terminal submissions, `{}` when there is nothing to report.
    pub results_json: String,
    pub created_at: DateTime<Utc>,
}

impl Submission {
    /// Create a fresh pending submission with empty verdict fields.
    pub fn new(
        learner_id: Uuid,
        quest_id: Uuid,
        submitted_code: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            learner_id,
            quest_id,
            submitted_code: submitted_code.into(),
            language: language.into(),
            status: SubmissionStatus::Pending,
            success: false,
            score: None,
            stdout: String::new(),
            stderr: String::new(),
            results_json: "{}".to_string(),
            created_at: Utc::now(),
        }
    }
}

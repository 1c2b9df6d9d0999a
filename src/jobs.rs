//! Queue message types for the grading pipeline
//!
//! A grading job is a snapshot of a submission's immutable inputs plus
//! the test cases resolved at enqueue time, so the worker never calls
//! back into the content catalog.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::submission::Submission;

/// One test case carried inside a grading job.
///
/// Visibility is not carried here: hidden cases are withheld from
/// learner-facing views, but they grade exactly like visible ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCasePayload {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub expected_output: String,
}

/// Job received from the grading queue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingJob {
    pub submission_id: Uuid,
    pub quest_id: Uuid,
    pub submitted_code: String,
    pub language: String,
    #[serde(default)]
    pub test_cases: Vec<TestCasePayload>,
}

impl GradingJob {
    /// Snapshot a persisted submission into a queue message.
    pub fn from_submission(submission: &Submission, test_cases: Vec<TestCasePayload>) -> Self {
        Self {
            submission_id: submission.id,
            quest_id: submission.quest_id,
            submitted_code: submission.submitted_code.clone(),
            language: submission.language.clone(),
            test_cases,
        }
    }
}

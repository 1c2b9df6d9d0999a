//! Submission intake
//!
//! Accepts a grading request, persists the submission in PENDING state,
//! snapshots a grading job and enqueues it. The caller gets the pending
//! record back immediately; grading happens asynchronously and is
//! observed by polling the submission.
//!
//! The HTTP surface sits behind the platform gateway, which owns
//! authentication and injects the learner id as the X-User-Id header.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::jobs::{GradingJob, TestCasePayload};
use crate::redis_manager::JobQueue;
use crate::store::SubmissionStore;
use crate::submission::{Submission, SubmissionStatus};
use crate::testcases::TestCaseSource;

/// Grading request as posted by the gateway
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRequest {
    pub quest_id: Uuid,
    #[serde(rename = "source")]
    pub submitted_code: String,
    #[serde(default)]
    pub language: String,
    /// Inline test cases; when absent the content catalog is consulted.
    #[serde(default)]
    pub test_cases: Option<Vec<TestCasePayload>>,
}

/// Learner-facing view of a submission
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResponse {
    pub id: Uuid,
    pub quest_id: Uuid,
    pub status: SubmissionStatus,
    pub success: bool,
    pub score: Option<f64>,
    pub stdout: String,
    pub stderr: String,
    pub results_json: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&Submission> for SubmissionResponse {
    fn from(submission: &Submission) -> Self {
        Self {
            id: submission.id,
            quest_id: submission.quest_id,
            status: submission.status,
            success: submission.success,
            score: submission.score,
            stdout: submission.stdout.clone(),
            stderr: submission.stderr.clone(),
            results_json: submission.results_json.clone(),
            timestamp: submission.created_at,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("submitted code must not be empty")]
    EmptySource,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Accepts grading requests and feeds the queue
pub struct SubmissionIntake {
    store: Arc<dyn SubmissionStore>,
    queue: Arc<dyn JobQueue>,
}

impl SubmissionIntake {
    pub fn new(store: Arc<dyn SubmissionStore>, queue: Arc<dyn JobQueue>) -> Self {
        Self { store, queue }
    }

    /// Persist a PENDING submission and enqueue its grading job.
    ///
    /// The record is inserted before the queue sees anything, so the
    /// worker always finds it. Test cases are whatever the caller
    /// resolved; an empty list means single-run grading.
    pub async fn create_submission(
        &self,
        quest_id: Uuid,
        source_code: String,
        language: String,
        test_cases: Vec<TestCasePayload>,
        learner_id: Uuid,
    ) -> Result<Submission, IntakeError> {
        if source_code.trim().is_empty() {
            return Err(IntakeError::EmptySource);
        }

        let submission = Submission::new(learner_id, quest_id, source_code, language);
        self.store.insert(&submission).await?;

        let job = GradingJob::from_submission(&submission, test_cases);
        self.queue.enqueue(&job).await?;

        info!(
            "Accepted submission {} for quest {} ({} test case(s))",
            submission.id,
            quest_id,
            job.test_cases.len()
        );
        Ok(submission)
    }

    /// Load a submission for the learner who owns it.
    pub async fn submission_for(
        &self,
        learner_id: Uuid,
        submission_id: Uuid,
    ) -> Result<Option<Submission>, IntakeError> {
        let Some(submission) = self.store.load(submission_id).await? else {
            return Ok(None);
        };
        Ok((submission.learner_id == learner_id).then_some(submission))
    }
}

/// Shared state for the intake router
#[derive(Clone)]
pub struct IntakeState {
    intake: Arc<SubmissionIntake>,
    test_cases: Arc<TestCaseSource>,
}

impl IntakeState {
    pub fn new(intake: Arc<SubmissionIntake>, test_cases: Arc<TestCaseSource>) -> Self {
        Self { intake, test_cases }
    }
}

pub fn router(state: IntakeState) -> Router {
    Router::new()
        .route("/api/submissions", post(submit_quest))
        .route("/api/submissions/{submission_id}", get(get_submission))
        .with_state(state)
}

fn learner_id(headers: &HeaderMap) -> Option<Uuid> {
    headers.get("x-user-id")?.to_str().ok()?.parse().ok()
}

async fn submit_quest(
    State(state): State<IntakeState>,
    headers: HeaderMap,
    Json(request): Json<SubmissionRequest>,
) -> Result<(StatusCode, Json<SubmissionResponse>), StatusCode> {
    let Some(learner) = learner_id(&headers) else {
        return Err(StatusCode::BAD_REQUEST);
    };

    // Resolve test cases before intake: inline ones win, otherwise ask
    // the catalog (which degrades to an empty list).
    let test_cases = match request.test_cases {
        Some(cases) => cases,
        None => state.test_cases.fetch_for_quest(request.quest_id).await,
    };

    match state
        .intake
        .create_submission(
            request.quest_id,
            request.submitted_code,
            request.language,
            test_cases,
            learner,
        )
        .await
    {
        Ok(submission) => Ok((StatusCode::ACCEPTED, Json((&submission).into()))),
        Err(IntakeError::EmptySource) => Err(StatusCode::UNPROCESSABLE_ENTITY),
        Err(IntakeError::Internal(e)) => {
            error!("Failed to accept submission: {:#}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn get_submission(
    State(state): State<IntakeState>,
    headers: HeaderMap,
    Path(submission_id): Path<Uuid>,
) -> Result<Json<SubmissionResponse>, StatusCode> {
    let Some(learner) = learner_id(&headers) else {
        return Err(StatusCode::BAD_REQUEST);
    };

    match state.intake.submission_for(learner, submission_id).await {
        Ok(Some(submission)) => Ok(Json((&submission).into())),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!("Failed to load submission {}: {:#}", submission_id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

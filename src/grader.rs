//! Grading worker
//!
//! Turns one grading job into one terminal submission state. The job is
//! considered handled even when grading fails; the only message that is
//! dropped outright is one whose submission record no longer exists.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::jobs::{GradingJob, TestCasePayload};
use crate::sandbox::{self, CodeExecutor};
use crate::store::SubmissionStore;
use crate::submission::{Submission, SubmissionStatus};

/// How a job is graded, resolved once at the top of processing
enum GradingMode {
    /// No test cases: one bare run, judged on exit code alone
    SingleRun,
    /// One run per test case, with partial credit
    Suite(Vec<TestCasePayload>),
}

impl GradingMode {
    fn from_job(job: &GradingJob) -> Self {
        if job.test_cases.is_empty() {
            GradingMode::SingleRun
        } else {
            GradingMode::Suite(job.test_cases.clone())
        }
    }
}

/// Some runtimes omit the exit code when they terminate cleanly, so an
/// absent code counts as clean in suite mode.
fn is_clean_exit(code: Option<i32>) -> bool {
    matches!(code, None | Some(0))
}

/// CRLF to LF, leading/trailing whitespace trimmed.
fn normalize_output(value: &str) -> String {
    value.replace("\r\n", "\n").trim().to_string()
}

/// Result of one test case, carried in the submission's results document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CaseResult {
    description: String,
    input: String,
    expected_output: String,
    actual_output: String,
    passed: bool,
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
    /// Set only when the execution itself failed, not on a wrong answer
    error: Option<String>,
}

/// Aggregate suite verdict, serialized as the results document
#[derive(Debug, Serialize, Deserialize)]
struct SuiteSummary {
    passed: usize,
    total: usize,
    score: f64,
    results: Vec<CaseResult>,
}

/// Process one grading job end to end.
///
/// Writes the GRADING state before the first sandbox call, then writes
/// the terminal state unconditionally as the last step. Errors escaping
/// the grading branches force the ERROR verdict; they never propagate
/// back to the queue transport.
pub async fn process_grading_job(
    job: &GradingJob,
    store: &dyn SubmissionStore,
    executor: &dyn CodeExecutor,
) -> Result<()> {
    info!("Received grading job for submission {}", job.submission_id);

    let Some(mut submission) = store.load(job.submission_id).await? else {
        // No record to update; this is the one message we drop silently.
        error!("Submission not found: {}", job.submission_id);
        return Ok(());
    };

    if submission.status.is_terminal() {
        // At-least-once delivery: a redelivered job re-grades and
        // overwrites the previous verdict.
        info!(
            "Submission {} is already {}; grading again",
            submission.id, submission.status
        );
    }

    // Mark in progress before any sandbox call so concurrent readers see
    // GRADING rather than a stale PENDING, and clear any stale score
    // from a redelivered terminal record.
    submission.status = SubmissionStatus::Grading;
    submission.score = None;
    store.save(&submission).await?;

    if let Err(e) = grade(job, &mut submission, executor).await {
        error!(
            "Grading failed for submission {}: {:#}",
            job.submission_id, e
        );
        submission.status = SubmissionStatus::Error;
        submission.success = false;
        submission.score = Some(0.0);
        submission.stdout = String::new();
        submission.stderr = format!("{:#}", e);
        submission.results_json = "{}".to_string();
    }

    store.save(&submission).await?;
    info!(
        "Grading complete for submission {}: status={}",
        job.submission_id, submission.status
    );
    Ok(())
}

async fn grade(
    job: &GradingJob,
    submission: &mut Submission,
    executor: &dyn CodeExecutor,
) -> Result<()> {
    match GradingMode::from_job(job) {
        GradingMode::SingleRun => run_single(job, submission, executor).await,
        GradingMode::Suite(cases) => run_suite(job, submission, executor, &cases).await,
    }
}

/// Single-run mode: success means the run phase reported exit code 0.
/// Unlike suite mode, an absent exit code is not good enough here.
async fn run_single(
    job: &GradingJob,
    submission: &mut Submission,
    executor: &dyn CodeExecutor,
) -> Result<()> {
    info!(
        "Single-run grading for submission {} (language: {})",
        job.submission_id, job.language
    );

    let response = executor
        .execute(&job.language, &job.submitted_code, None)
        .await?;

    let run = response.run.as_ref();
    let success = run.is_some_and(|run| run.code == Some(0));

    submission.status = if success {
        SubmissionStatus::Completed
    } else {
        SubmissionStatus::Error
    };
    submission.success = success;
    submission.stdout = run.and_then(|r| r.stdout.clone()).unwrap_or_default();
    submission.stderr = run.and_then(|r| r.stderr.clone()).unwrap_or_default();
    submission.results_json = sandbox::serialize_response(&response);
    Ok(())
}

/// Suite mode: every case runs in order, partial credit is a completed
/// verdict, and one broken case never aborts the rest.
async fn run_suite(
    job: &GradingJob,
    submission: &mut Submission,
    executor: &dyn CodeExecutor,
    cases: &[TestCasePayload],
) -> Result<()> {
    info!(
        "Running {} test case(s) for submission {}",
        cases.len(),
        job.submission_id
    );

    let mut results = Vec::with_capacity(cases.len());
    let mut passed = 0usize;
    for case in cases {
        let result = run_case(job, case, executor).await;
        if result.passed {
            passed += 1;
        }
        results.push(result);
    }

    let total = cases.len();
    let score = passed as f64 * 100.0 / total as f64;

    submission.status = SubmissionStatus::Completed;
    submission.success = passed == total;
    submission.score = Some(score);
    // Detail lives in the per-case results; the submission-level streams
    // stay empty.
    submission.stdout = String::new();
    submission.stderr = String::new();

    let summary = SuiteSummary {
        passed,
        total,
        score,
        results,
    };
    submission.results_json = match serde_json::to_string(&summary) {
        Ok(json) => json,
        Err(e) => {
            warn!("Unable to serialize grading summary: {}", e);
            "{}".to_string()
        }
    };
    Ok(())
}

async fn run_case(
    job: &GradingJob,
    case: &TestCasePayload,
    executor: &dyn CodeExecutor,
) -> CaseResult {
    match executor
        .execute(&job.language, &job.submitted_code, Some(&case.input))
        .await
    {
        Ok(response) => {
            let run = response.run.as_ref();
            let stdout = run.and_then(|r| r.stdout.clone()).unwrap_or_default();
            let stderr = run.and_then(|r| r.stderr.clone()).unwrap_or_default();
            let exit_code = run.and_then(|r| r.code);

            let actual = normalize_output(&stdout);
            let passed = is_clean_exit(exit_code) && actual == normalize_output(&case.expected_output);

            CaseResult {
                description: case.description.clone(),
                input: case.input.clone(),
                expected_output: case.expected_output.clone(),
                actual_output: actual,
                passed,
                exit_code,
                stdout,
                stderr,
                error: None,
            }
        }
        Err(e) => {
            warn!(
                "Test case execution failed for submission {}: {}",
                job.submission_id, e
            );
            let message = e.to_string();
            CaseResult {
                description: case.description.clone(),
                input: case.input.clone(),
                expected_output: case.expected_output.clone(),
                actual_output: String::new(),
                passed: false,
                exit_code: None,
                stdout: String::new(),
                stderr: message.clone(),
                error: Some(message),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use uuid::Uuid;

    use super::*;
    use crate::sandbox::{ExecutionResponse, PhaseOutput, SandboxError};
    use crate::store::memory::MemorySubmissionStore;

    fn response(code: Option<i32>, stdout: &str) -> ExecutionResponse {
        ExecutionResponse {
            language: Some("python".to_string()),
            version: Some("latest".to_string()),
            run: Some(PhaseOutput {
                stdout: Some(stdout.to_string()),
                stderr: Some(String::new()),
                code,
                output: Some(stdout.to_string()),
                signal: None,
            }),
            compile: None,
        }
    }

    fn api_error() -> SandboxError {
        SandboxError::Api {
            status: 503,
            body: "sandbox unavailable".to_string(),
        }
    }

    /// Replays a scripted sequence of responses, one per call.
    struct ScriptedExecutor {
        script: Mutex<VecDeque<Result<ExecutionResponse, SandboxError>>>,
    }

    impl ScriptedExecutor {
        fn new(script: Vec<Result<ExecutionResponse, SandboxError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
            }
        }
    }

    #[async_trait]
    impl CodeExecutor for ScriptedExecutor {
        async fn execute(
            &self,
            _language: &str,
            _source_code: &str,
            _stdin: Option<&str>,
        ) -> Result<ExecutionResponse, SandboxError> {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .expect("executor called more times than scripted")
        }
    }

    /// Sums whitespace-separated integers from stdin, like the reference
    /// quest solution would.
    struct SummingExecutor;

    #[async_trait]
    impl CodeExecutor for SummingExecutor {
        async fn execute(
            &self,
            _language: &str,
            _source_code: &str,
            stdin: Option<&str>,
        ) -> Result<ExecutionResponse, SandboxError> {
            let sum: i64 = stdin
                .unwrap_or_default()
                .split_whitespace()
                .filter_map(|token| token.parse::<i64>().ok())
                .sum();
            Ok(response(Some(0), &format!("{}\n", sum)))
        }
    }

    fn pending_submission() -> Submission {
        Submission::new(Uuid::new_v4(), Uuid::new_v4(), "print(1)", "py")
    }

    fn job_for(submission: &Submission, cases: Vec<(&str, &str)>) -> GradingJob {
        let test_cases = cases
            .into_iter()
            .enumerate()
            .map(|(i, (input, expected))| TestCasePayload {
                description: format!("case {}", i + 1),
                input: input.to_string(),
                expected_output: expected.to_string(),
            })
            .collect();
        GradingJob::from_submission(submission, test_cases)
    }

    async fn load(store: &MemorySubmissionStore, id: Uuid) -> Submission {
        store.load(id).await.unwrap().expect("submission exists")
    }

    #[test]
    fn test_clean_exit_predicate() {
        assert!(is_clean_exit(None));
        assert!(is_clean_exit(Some(0)));
        assert!(!is_clean_exit(Some(1)));
        assert!(!is_clean_exit(Some(-9)));
    }

    #[test]
    fn test_normalize_output() {
        assert_eq!(normalize_output("1\r\n2\r\n3\r\n"), "1\n2\n3");
        assert_eq!(normalize_output("  hello \n"), "hello");
        assert_eq!(normalize_output(""), "");
    }

    #[tokio::test]
    async fn test_single_run_success() {
        let submission = pending_submission();
        let store = MemorySubmissionStore::with_submission(&submission).await;
        let executor = ScriptedExecutor::new(vec![Ok(response(Some(0), "hello\n"))]);

        let job = job_for(&submission, vec![]);
        process_grading_job(&job, &store, &executor).await.unwrap();

        let graded = load(&store, submission.id).await;
        assert_eq!(graded.status, SubmissionStatus::Completed);
        assert!(graded.success);
        assert_eq!(graded.score, None);
        assert_eq!(graded.stdout, "hello\n");
        assert!(!graded.results_json.is_empty());
    }

    #[tokio::test]
    async fn test_single_run_nonzero_exit_is_error() {
        let submission = pending_submission();
        let store = MemorySubmissionStore::with_submission(&submission).await;
        let executor = ScriptedExecutor::new(vec![Ok(response(Some(1), ""))]);

        let job = job_for(&submission, vec![]);
        process_grading_job(&job, &store, &executor).await.unwrap();

        let graded = load(&store, submission.id).await;
        assert_eq!(graded.status, SubmissionStatus::Error);
        assert!(!graded.success);
    }

    #[tokio::test]
    async fn test_single_run_requires_explicit_zero_exit() {
        // Suite mode is lenient about missing exit codes; a bare run is not.
        let submission = pending_submission();
        let store = MemorySubmissionStore::with_submission(&submission).await;
        let executor = ScriptedExecutor::new(vec![Ok(response(None, "ok\n"))]);

        let job = job_for(&submission, vec![]);
        process_grading_job(&job, &store, &executor).await.unwrap();

        let graded = load(&store, submission.id).await;
        assert_eq!(graded.status, SubmissionStatus::Error);
        assert!(!graded.success);
    }

    #[tokio::test]
    async fn test_suite_partial_credit() {
        let submission = pending_submission();
        let store = MemorySubmissionStore::with_submission(&submission).await;

        let job = job_for(&submission, vec![("1 2", "3"), ("2 2", "5")]);
        process_grading_job(&job, &store, &SummingExecutor)
            .await
            .unwrap();

        let graded = load(&store, submission.id).await;
        assert_eq!(graded.status, SubmissionStatus::Completed);
        assert!(!graded.success);
        assert_eq!(graded.score, Some(50.0));
        assert_eq!(graded.stdout, "");
        assert_eq!(graded.stderr, "");

        let summary: SuiteSummary = serde_json::from_str(&graded.results_json).unwrap();
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.score, 50.0);
        let passes: Vec<bool> = summary.results.iter().map(|r| r.passed).collect();
        assert_eq!(passes, vec![true, false]);
        assert_eq!(summary.results[0].actual_output, "3");
        assert_eq!(summary.results[1].expected_output, "5");
    }

    #[tokio::test]
    async fn test_suite_full_pass_sets_success() {
        let submission = pending_submission();
        let store = MemorySubmissionStore::with_submission(&submission).await;

        let job = job_for(&submission, vec![("1 2", "3"), ("10 20", "30"), ("0", "0")]);
        process_grading_job(&job, &store, &SummingExecutor)
            .await
            .unwrap();

        let graded = load(&store, submission.id).await;
        assert!(graded.success);
        assert_eq!(graded.score, Some(100.0));
    }

    #[tokio::test]
    async fn test_whitespace_and_crlf_tolerance() {
        let submission = pending_submission();
        let store = MemorySubmissionStore::with_submission(&submission).await;
        let executor = ScriptedExecutor::new(vec![Ok(response(Some(0), "1\r\n2\r\n3\r\n"))]);

        let job = job_for(&submission, vec![("", "1\n2\n3")]);
        process_grading_job(&job, &store, &executor).await.unwrap();

        let graded = load(&store, submission.id).await;
        assert!(graded.success);
        assert_eq!(graded.score, Some(100.0));
    }

    #[tokio::test]
    async fn test_null_exit_code_is_lenient_in_suite_mode() {
        let submission = pending_submission();
        let store = MemorySubmissionStore::with_submission(&submission).await;
        // Same matching output; only the exit code differs.
        let executor = ScriptedExecutor::new(vec![
            Ok(response(None, "42\n")),
            Ok(response(Some(1), "42\n")),
        ]);

        let job = job_for(&submission, vec![("", "42"), ("", "42")]);
        process_grading_job(&job, &store, &executor).await.unwrap();

        let graded = load(&store, submission.id).await;
        let summary: SuiteSummary = serde_json::from_str(&graded.results_json).unwrap();
        let passes: Vec<bool> = summary.results.iter().map(|r| r.passed).collect();
        assert_eq!(passes, vec![true, false]);
        assert_eq!(graded.score, Some(50.0));
    }

    #[tokio::test]
    async fn test_failed_case_does_not_abort_the_suite() {
        let submission = pending_submission();
        let store = MemorySubmissionStore::with_submission(&submission).await;
        let executor = ScriptedExecutor::new(vec![
            Ok(response(Some(0), "a\n")),
            Err(api_error()),
            Ok(response(Some(0), "c\n")),
        ]);

        let job = job_for(&submission, vec![("", "a"), ("", "b"), ("", "c")]);
        process_grading_job(&job, &store, &executor).await.unwrap();

        let graded = load(&store, submission.id).await;
        assert_eq!(graded.status, SubmissionStatus::Completed);
        assert!(!graded.success);

        let summary: SuiteSummary = serde_json::from_str(&graded.results_json).unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.passed, 2);
        let passes: Vec<bool> = summary.results.iter().map(|r| r.passed).collect();
        assert_eq!(passes, vec![true, false, true]);
        assert!(summary.results[1].error.is_some());
        assert_eq!(summary.results[1].expected_output, "b");
        assert_eq!(summary.results[1].actual_output, "");
    }

    #[tokio::test]
    async fn test_missing_submission_drops_the_job() {
        let store = MemorySubmissionStore::new();
        let executor = ScriptedExecutor::new(vec![]);

        let submission = pending_submission();
        let job = job_for(&submission, vec![("", "x")]);

        // No error to the transport, no writes, and no executor calls.
        process_grading_job(&job, &store, &executor).await.unwrap();
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn test_executor_failure_in_single_run_forces_error_verdict() {
        let submission = pending_submission();
        let store = MemorySubmissionStore::with_submission(&submission).await;
        let executor = ScriptedExecutor::new(vec![Err(api_error())]);

        let job = job_for(&submission, vec![]);
        process_grading_job(&job, &store, &executor).await.unwrap();

        let graded = load(&store, submission.id).await;
        assert_eq!(graded.status, SubmissionStatus::Error);
        assert!(!graded.success);
        assert_eq!(graded.score, Some(0.0));
        assert_eq!(graded.stdout, "");
        assert!(graded.stderr.contains("sandbox unavailable"));
        assert_eq!(graded.results_json, "{}");
    }

    #[tokio::test]
    async fn test_grading_state_is_written_before_the_verdict() {
        let submission = pending_submission();
        let store = MemorySubmissionStore::with_submission(&submission).await;
        let executor = ScriptedExecutor::new(vec![Ok(response(Some(0), "ok\n"))]);

        let job = job_for(&submission, vec![]);
        process_grading_job(&job, &store, &executor).await.unwrap();

        let writes = store.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].status, SubmissionStatus::Grading);
        assert_eq!(writes[0].score, None);
        assert!(writes[1].status.is_terminal());
    }

    #[tokio::test]
    async fn test_redelivery_overwrites_terminal_state() {
        let mut submission = pending_submission();
        submission.status = SubmissionStatus::Completed;
        submission.success = true;
        submission.score = Some(100.0);
        let store = MemorySubmissionStore::with_submission(&submission).await;

        let job = job_for(&submission, vec![("1 2", "4")]);
        process_grading_job(&job, &store, &SummingExecutor)
            .await
            .unwrap();

        let graded = load(&store, submission.id).await;
        assert_eq!(graded.status, SubmissionStatus::Completed);
        assert!(!graded.success);
        assert_eq!(graded.score, Some(0.0));
    }
}

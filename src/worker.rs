use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

use crate::database as db;
use crate::grader::{GradeRequest, Grader};
use crate::languages::Language;
use crate::queue::SubmissionQueue;
use crate::routes::SubmissionMessage;

/// Message stored for the user when grading itself fails; the real diagnostic
/// stays in the server log only.
const GRADING_FAILED_MESSAGE: &str = "could not grade this submission, please retry";

/// One worker of the bounded execution pool. Each worker owns one sandbox
/// runner (wrapped in a [`Grader`]) and drains the submission queue until the
/// shutdown token fires.
pub async fn worker(
    id: u8,
    db_pool: Arc<SqlitePool>,
    queue: Arc<SubmissionQueue>,
    grader: Arc<Grader>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    log::info!("Worker {id} initialized");

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                log::info!("Worker {id} received shutdown signal, stopping");
                break;
            }

            message = queue.pop() => {
                let submission_id = message.id();
                log::info!("Worker {id} got submission {submission_id} from queue");

                if let Err(e) = run_submission(&db_pool, &grader, submission_id).await {
                    log::error!("Worker {id} failed to process submission {submission_id}: {e}");
                }

                if let SubmissionMessage::Blocking { responder, .. } = message {
                    match db::fetch_submission(&db_pool, submission_id).await {
                        Ok(Some(record)) => {
                            if responder.send(record).is_err() {
                                log::warn!(
                                    "Failed to send submission {submission_id} result back to server"
                                );
                            }
                        }
                        other => {
                            log::error!(
                                "Failed to fetch submission {submission_id} for blocking reply: {other:?}"
                            );
                        }
                    }
                }
            }
        };
    }

    log::info!("Worker {id} has shut down gracefully");
    Ok(())
}

/// Drives one submission through the grading state machine:
/// pending -> running -> terminal verdict. Any error escaping the grader
/// marks the submission as failed with a generic message and is not retried.
pub async fn run_submission(
    db_pool: &SqlitePool,
    grader: &Arc<Grader>,
    submission_id: i64,
) -> anyhow::Result<()> {
    let submission = db::fetch_submission(db_pool, submission_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("submission {submission_id} not found"))?;

    // A superseded or already-graded submission is never regraded in place.
    if !db::update_submission_to_running(db_pool, submission_id).await? {
        log::warn!("Submission {submission_id} is not pending, skipping");
        return Ok(());
    }

    let request = match build_grade_request(db_pool, &submission).await {
        Ok(request) => request,
        Err(e) => {
            log::error!("Submission {submission_id} cannot be graded: {e}");
            db::mark_submission_failed(db_pool, submission_id, GRADING_FAILED_MESSAGE).await?;
            return Ok(());
        }
    };

    let grader_ref = Arc::clone(grader);
    let graded = tokio::task::spawn_blocking(move || grader_ref.grade(&request)).await;

    match graded {
        Ok(Ok(report)) => {
            log::info!(
                "Submission {submission_id} graded: {} ({}/{} passed, score {})",
                report.verdict.as_str(),
                report.passed_count,
                report.total_count,
                report.score
            );
            db::save_grade_report(db_pool, submission_id, submission.problem_id, &report).await?;
        }
        Ok(Err(grade_error)) => {
            // Infrastructure fault, not a fault of the submitted code. Full
            // detail is operator-only.
            log::error!("Grading submission {submission_id} failed: {grade_error}");
            db::mark_submission_failed(db_pool, submission_id, GRADING_FAILED_MESSAGE).await?;
        }
        Err(join_error) => {
            log::error!("Grading task for submission {submission_id} panicked: {join_error}");
            db::mark_submission_failed(db_pool, submission_id, GRADING_FAILED_MESSAGE).await?;
        }
    }

    Ok(())
}

async fn build_grade_request(
    db_pool: &SqlitePool,
    submission: &crate::routes::SubmissionRecord,
) -> anyhow::Result<GradeRequest> {
    let language = Language::from_name(&submission.language)
        .ok_or_else(|| anyhow::anyhow!("unknown language {}", submission.language))?;
    let limits = db::fetch_problem_limits(db_pool, submission.problem_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("problem {} not configured", submission.problem_id))?;
    let test_cases = db::fetch_grade_cases(db_pool, submission.problem_id).await?;

    Ok(GradeRequest {
        code: submission.source_code.clone(),
        language,
        test_cases,
        time_limit: Duration::from_secs(limits.time_limit_s),
        memory_limit_mb: limits.memory_limit_mb,
        max_score: limits.max_score,
    })
}

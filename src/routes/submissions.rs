use std::sync::Arc;
use std::time::Duration;

use actix_web::{HttpResponse, Responder, get, post, web};
use chrono::DateTime;
use serde::Deserialize;
use sqlx::sqlite::SqlitePool;
use tokio::sync::oneshot;

use super::{ErrorResponse, SubmissionMessage, SubmissionRecord, SubmissionRequest, SubmissionsQuery};
use crate::database as db;
use crate::languages::Language;
use crate::queue::SubmissionQueue;

/// Upper bound a blocking submission may spend waiting for its result before
/// the request is answered with 503. Wrapped so it can live in app data
/// without colliding with other `Duration` values.
#[derive(Clone, Copy)]
pub struct WaitTimeout(pub Duration);

#[derive(Deserialize)]
pub struct SubmitParams {
    #[serde(default)]
    pub wait: bool,
}

#[post("/submissions")]
pub async fn post_submission_handler(
    queue: web::Data<SubmissionQueue>,
    pool: web::Data<SqlitePool>,
    wait_timeout: web::Data<WaitTimeout>,
    params: web::Query<SubmitParams>,
    body: web::Json<SubmissionRequest>,
) -> impl Responder {
    if body.source_code.trim().is_empty() {
        return HttpResponse::BadRequest().json(ErrorResponse {
            reason: "ERR_INVALID_ARGUMENT",
            code: 1,
        });
    }

    match db::problem_exists(pool.get_ref(), body.problem_id).await {
        Ok(true) => {}
        Ok(false) => {
            return HttpResponse::NotFound().json(ErrorResponse {
                reason: "ERR_NOT_FOUND",
                code: 3,
            });
        }
        Err(e) => {
            log::error!("Failed to check problem existence: {e}");
            return HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            });
        }
    }

    let total_tests = match db::count_test_cases(pool.get_ref(), body.problem_id).await {
        Ok(n) => n,
        Err(e) => {
            log::error!("Failed to count test cases: {e}");
            return HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            });
        }
    };

    let submission_id = match db::create_submission(pool.get_ref(), &body, total_tests).await {
        Ok(id) => {
            log::info!("Inserted submission {id} into database");
            id
        }
        Err(e) => {
            log::error!("Failed to insert submission into database: {e}");
            return HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            });
        }
    };

    handle_submission(
        submission_id,
        queue.into_inner(),
        pool.get_ref(),
        params.wait,
        wait_timeout.0,
    )
    .await
}

pub(super) async fn handle_submission(
    submission_id: i64,
    queue: Arc<SubmissionQueue>,
    pool: &SqlitePool,
    wait: bool,
    wait_timeout: Duration,
) -> HttpResponse {
    if wait {
        let (tx, rx) = oneshot::channel::<SubmissionRecord>();
        queue
            .push(SubmissionMessage::Blocking {
                submission_id,
                responder: tx,
            })
            .await;
        log::debug!("Sent blocking submission {submission_id} to queue");

        match tokio::time::timeout(wait_timeout, rx).await {
            Ok(Ok(record)) => {
                log::info!("Received final result of blocking submission {}", record.id);
                HttpResponse::Ok().json(record)
            }
            Ok(Err(e)) => {
                log::error!("Failed to receive submission response: {e}");
                HttpResponse::InternalServerError().json(ErrorResponse {
                    reason: "ERR_INTERNAL",
                    code: 6,
                })
            }
            Err(_) => {
                // The submission keeps grading in the background; the client
                // can poll GET /submissions/{id} for the eventual verdict.
                log::warn!(
                    "Blocking submission {submission_id} did not finish within {wait_timeout:?}"
                );
                HttpResponse::ServiceUnavailable().json(ErrorResponse {
                    reason: "ERR_BUSY",
                    code: 7,
                })
            }
        }
    } else {
        queue
            .push(SubmissionMessage::FireAndForget { submission_id })
            .await;
        log::debug!("Sent non-blocking submission {submission_id} to queue");

        match db::fetch_submission(pool, submission_id).await {
            Ok(Some(record)) => HttpResponse::Ok().json(record),
            other => {
                log::error!("Failed to read back submission {submission_id}: {other:?}");
                HttpResponse::InternalServerError().json(ErrorResponse {
                    reason: "ERR_EXTERNAL",
                    code: 5,
                })
            }
        }
    }
}

#[get("/submissions")]
pub async fn get_submissions_handler(
    pool: web::Data<SqlitePool>,
    query: web::Query<SubmissionsQuery>,
) -> impl Responder {
    for bound in [&query.from, &query.to].into_iter().flatten() {
        if DateTime::parse_from_rfc3339(bound).is_err() {
            return HttpResponse::BadRequest().json(ErrorResponse {
                reason: "ERR_INVALID_ARGUMENT",
                code: 1,
            });
        }
    }

    match db::fetch_submissions_by_query(&query, pool.get_ref()).await {
        Ok(records) => {
            log::info!("Got {} submission records", records.len());
            HttpResponse::Ok().json(records)
        }
        Err(e) => {
            log::error!("Failed to retrieve submission records: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            })
        }
    }
}

#[get("/submissions/{id}")]
pub async fn get_submission_by_id_handler(
    pool: web::Data<SqlitePool>,
    path: web::Path<i64>,
) -> impl Responder {
    let submission_id = path.into_inner();

    match db::fetch_submission(pool.get_ref(), submission_id).await {
        Ok(Some(record)) => HttpResponse::Ok().json(record),
        Ok(None) => HttpResponse::NotFound().json(ErrorResponse {
            reason: "ERR_NOT_FOUND",
            code: 3,
        }),
        Err(e) => {
            log::error!("Failed to retrieve submission {submission_id}: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            })
        }
    }
}

/// Rejudging never rewrites history: the graded submission stays untouched
/// and a fresh pending submission with the same code is created instead.
#[post("/submissions/{id}/rejudge")]
pub async fn post_rejudge_handler(
    queue: web::Data<SubmissionQueue>,
    pool: web::Data<SqlitePool>,
    path: web::Path<i64>,
) -> impl Responder {
    let submission_id = path.into_inner();

    let original = match db::fetch_submission(pool.get_ref(), submission_id).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            return HttpResponse::NotFound().json(ErrorResponse {
                reason: "ERR_NOT_FOUND",
                code: 3,
            });
        }
        Err(e) => {
            log::error!("Failed to retrieve submission {submission_id}: {e}");
            return HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            });
        }
    };

    if original.status == db::STATUS_PENDING || original.status == db::STATUS_RUNNING {
        return HttpResponse::BadRequest().json(ErrorResponse {
            reason: "ERR_INVALID_STATE",
            code: 2,
        });
    }

    let Some(language) = Language::from_name(&original.language) else {
        log::error!(
            "Submission {submission_id} has unknown language {:?}",
            original.language
        );
        return HttpResponse::InternalServerError().json(ErrorResponse {
            reason: "ERR_INTERNAL",
            code: 6,
        });
    };

    let request = SubmissionRequest {
        user_id: original.user_id,
        problem_id: original.problem_id,
        source_code: original.source_code,
        language,
    };

    let total_tests = match db::count_test_cases(pool.get_ref(), request.problem_id).await {
        Ok(n) => n,
        Err(e) => {
            log::error!("Failed to count test cases: {e}");
            return HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            });
        }
    };

    let new_id = match db::create_submission(pool.get_ref(), &request, total_tests).await {
        Ok(id) => {
            log::info!("Rejudge of submission {submission_id} created submission {id}");
            id
        }
        Err(e) => {
            log::error!("Failed to insert rejudge submission: {e}");
            return HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            });
        }
    };

    queue
        .push(SubmissionMessage::FireAndForget {
            submission_id: new_id,
        })
        .await;

    match db::fetch_submission(pool.get_ref(), new_id).await {
        Ok(Some(record)) => HttpResponse::Ok().json(record),
        other => {
            log::error!("Failed to read back submission {new_id}: {other:?}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            })
        }
    }
}

mod problems;
mod submissions;

pub use problems::{get_problem_by_id_handler, get_problems_handler};
pub use submissions::{
    WaitTimeout, get_submission_by_id_handler, get_submissions_handler, post_rejudge_handler,
    post_submission_handler,
};

use actix_web::error::{InternalError, JsonPayloadError, QueryPayloadError};
use actix_web::{HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::languages::Language;

#[derive(Serialize)]
pub(crate) struct ErrorResponse {
    pub reason: &'static str,
    pub code: u32,
}

pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let response = HttpResponse::BadRequest().json(ErrorResponse {
        reason: "ERR_INVALID_ARGUMENT",
        code: 1,
    });
    InternalError::from_response(err, response).into()
}

pub fn query_error_handler(err: QueryPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let response = HttpResponse::BadRequest().json(ErrorResponse {
        reason: "ERR_INVALID_ARGUMENT",
        code: 1,
    });
    InternalError::from_response(err, response).into()
}

/// A new submission as posted by the enclosing platform (auth and tenancy are
/// resolved upstream; only the owning user id arrives here).
#[derive(Serialize, Deserialize, Debug)]
pub struct SubmissionRequest {
    pub user_id: i64,
    pub problem_id: i64,
    pub source_code: String,
    pub language: Language,
}

/// Full submission state as returned by the API. Hidden test cases keep their
/// pass/fail flags but have `actual_output` withheld.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SubmissionRecord {
    pub id: i64,
    pub user_id: i64,
    pub problem_id: i64,
    pub source_code: String,
    pub language: String,
    pub status: String,
    pub score: i64,
    pub passed_tests: i64,
    pub total_tests: i64,
    pub time_ms: Option<i64>,
    pub memory_kb: Option<i64>,
    pub error_message: Option<String>,
    pub failed_test_case_id: Option<i64>,
    pub created_time: String,
    pub updated_time: String,
    pub completed_time: Option<String>,
    pub cases: Vec<CaseResultRecord>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CaseResultRecord {
    pub test_case_id: i64,
    pub passed: bool,
    pub actual_output: Option<String>,
    pub time_ms: i64,
    pub memory_kb: Option<i64>,
    pub error_message: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ProblemSummary {
    pub id: i64,
    pub title: String,
    pub difficulty: String,
    pub category: String,
    pub max_score: i64,
    pub total_submissions: i64,
    pub accepted_submissions: i64,
    pub acceptance_rate: f64,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ProblemDetail {
    #[serde(flatten)]
    pub summary: ProblemSummary,
    pub statement: String,
    pub time_limit_s: i64,
    pub memory_limit_mb: i64,
    pub python_template: String,
    pub javascript_template: String,
    pub java_template: String,
    pub sample_cases: Vec<SampleCase>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct SampleCase {
    pub input_data: String,
    pub expected_output: String,
}

/// Work item handed to the worker pool. Blocking submissions carry a channel
/// the worker answers with the final record.
pub enum SubmissionMessage {
    FireAndForget {
        submission_id: i64,
    },
    Blocking {
        submission_id: i64,
        responder: oneshot::Sender<SubmissionRecord>,
    },
}

impl SubmissionMessage {
    pub fn id(&self) -> i64 {
        match self {
            Self::FireAndForget { submission_id } => *submission_id,
            Self::Blocking { submission_id, .. } => *submission_id,
        }
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct SubmissionsQuery {
    pub user_id: Option<i64>,
    pub problem_id: Option<i64>,
    pub language: Option<String>,
    pub status: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

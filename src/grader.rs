use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::SandboxImages;
use crate::languages::{Language, PrepareError, WrapperStatus, WrapperVerdict};
use crate::sandbox::{ExecutionOutcome, ResourceLimits, SandboxError, SandboxRunner};

/// Final categorical outcome of a grading pass, in the order used for
/// priority selection when different test cases fail differently.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    CompilationError,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    Accepted,
    WrongAnswer,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CompilationError => "compilation_error",
            Self::TimeLimitExceeded => "time_limit_exceeded",
            Self::MemoryLimitExceeded => "memory_limit_exceeded",
            Self::RuntimeError => "runtime_error",
            Self::Accepted => "accepted",
            Self::WrongAnswer => "wrong_answer",
        }
    }
}

/// One grading request: everything needed to judge a submission, detached
/// from persistence so the grader can run on a blocking thread.
#[derive(Debug, Clone)]
pub struct GradeRequest {
    pub code: String,
    pub language: Language,
    pub test_cases: Vec<GradeCase>,
    pub time_limit: Duration,
    pub memory_limit_mb: u32,
    pub max_score: i64,
}

#[derive(Debug, Clone)]
pub struct GradeCase {
    pub test_case_id: i64,
    pub input_data: String,
    pub expected_output: String,
    pub weight: i64,
}

/// Per-test outcome, reported in test-case declaration order.
#[derive(Debug, Clone)]
pub struct CaseReport {
    pub test_case_id: i64,
    pub passed: bool,
    pub actual_output: Option<String>,
    pub time_ms: u64,
    pub memory_kb: Option<u64>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GradeReport {
    pub verdict: Verdict,
    pub score: i64,
    pub passed_count: i64,
    pub total_count: i64,
    pub total_time_ms: u64,
    pub max_memory_kb: Option<u64>,
    pub first_failing_test_id: Option<i64>,
    pub per_test: Vec<CaseReport>,
}

/// Failures of the grading machinery itself. These abort the pass and must
/// never be reported as a fault of the submitted code.
#[derive(Debug, thiserror::Error)]
pub enum GradeError {
    #[error("no test cases configured for this problem")]
    NoTestCases,
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

const STDERR_TAIL_LIMIT: usize = 2000;

/// Judges submissions by driving a sandbox runner once per test case.
///
/// Constructed with its runner injected so the pipeline and the tests can
/// choose the backend; there is no process-wide executor state.
pub struct Grader {
    runner: Box<dyn SandboxRunner>,
    images: SandboxImages,
}

impl Grader {
    pub fn new(runner: Box<dyn SandboxRunner>, images: SandboxImages) -> Self {
        Self { runner, images }
    }

    /// Runs every test case in declaration order and aggregates the verdict
    /// and weighted score. Per-case failures never stop the pass; only a
    /// [`SandboxError`] does, since no further case could meaningfully run.
    pub fn grade(&self, request: &GradeRequest) -> Result<GradeReport, GradeError> {
        if request.test_cases.is_empty() {
            return Err(GradeError::NoTestCases);
        }

        let artifact = match request.language.prepare(&request.code, &self.images) {
            Ok(artifact) => artifact,
            Err(e) => return Ok(report_unpreparable(request, &e)),
        };
        let limits = ResourceLimits {
            time_limit: request.time_limit,
            memory_limit_mb: request.memory_limit_mb,
        };

        let mut per_test = Vec::with_capacity(request.test_cases.len());
        let mut tally = VerdictTally::default();
        let mut compile_failed = false;

        for case in &request.test_cases {
            if compile_failed {
                // A language-level compile failure is input-independent, so
                // the remaining cases are recorded without another run.
                per_test.push(CaseReport {
                    test_case_id: case.test_case_id,
                    passed: false,
                    actual_output: None,
                    time_ms: 0,
                    memory_kb: None,
                    error_message: Some("compilation failed".to_string()),
                });
                continue;
            }

            let outcome = self.runner.execute(&artifact, &case.input_data, &limits)?;
            let report = classify_case(case, outcome, &limits, &mut tally);
            compile_failed = tally.compile_error;
            per_test.push(report);
        }

        Ok(aggregate(request, per_test, &tally))
    }
}

#[derive(Default)]
struct VerdictTally {
    compile_error: bool,
    time_exceeded: bool,
    memory_exceeded: bool,
    runtime_error: bool,
}

fn classify_case(
    case: &GradeCase,
    outcome: ExecutionOutcome,
    limits: &ResourceLimits,
    tally: &mut VerdictTally,
) -> CaseReport {
    let mut report = CaseReport {
        test_case_id: case.test_case_id,
        passed: false,
        actual_output: None,
        time_ms: 0,
        memory_kb: None,
        error_message: None,
    };

    match outcome {
        ExecutionOutcome::TimeExceeded { .. } => {
            tally.time_exceeded = true;
            report.time_ms = limits.time_limit.as_millis() as u64;
            report.error_message = Some("time limit exceeded".to_string());
        }
        ExecutionOutcome::MemoryExceeded { elapsed_ms, .. } => {
            tally.memory_exceeded = true;
            report.time_ms = elapsed_ms;
            report.error_message = Some("memory limit exceeded".to_string());
        }
        ExecutionOutcome::Crashed {
            exit_code,
            stderr,
            elapsed_ms,
        } => {
            tally.runtime_error = true;
            report.time_ms = elapsed_ms;
            report.error_message = Some(format!(
                "process crashed (exit code {:?}): {}",
                exit_code,
                tail(&stderr)
            ));
        }
        ExecutionOutcome::Success {
            stdout,
            stderr,
            elapsed_ms,
        } => {
            report.time_ms = elapsed_ms;
            match WrapperVerdict::from_stdout(&stdout) {
                None => {
                    tally.runtime_error = true;
                    report.error_message = Some("no result emitted by the program".to_string());
                }
                Some(verdict) => {
                    report.memory_kb = verdict.memory_kb;
                    match verdict.status {
                        WrapperStatus::CompileError => {
                            tally.compile_error = true;
                            report.error_message =
                                Some(error_detail(verdict.error, &stderr, "compilation failed"));
                        }
                        WrapperStatus::RuntimeError => {
                            tally.runtime_error = true;
                            report.error_message =
                                Some(error_detail(verdict.error, &stderr, "runtime error"));
                        }
                        WrapperStatus::Ok => {
                            let actual = verdict.output.unwrap_or_default();
                            report.passed = outputs_match(&actual, &case.expected_output);
                            report.actual_output = Some(actual);
                        }
                    }
                }
            }
        }
    }

    report
}

fn aggregate(request: &GradeRequest, per_test: Vec<CaseReport>, tally: &VerdictTally) -> GradeReport {
    let total_count = per_test.len() as i64;
    let passed_count = per_test.iter().filter(|c| c.passed).count() as i64;
    let total_time_ms = per_test.iter().map(|c| c.time_ms).sum();
    let max_memory_kb = per_test.iter().filter_map(|c| c.memory_kb).max();
    let first_failing_test_id = per_test
        .iter()
        .find(|c| !c.passed)
        .map(|c| c.test_case_id);

    let total_weight: i64 = request.test_cases.iter().map(|c| c.weight).sum();
    let passed_weight: i64 = request
        .test_cases
        .iter()
        .zip(&per_test)
        .filter(|(_, report)| report.passed)
        .map(|(case, _)| case.weight)
        .sum();
    let score = if total_weight > 0 {
        ((passed_weight as f64 / total_weight as f64) * request.max_score as f64).round() as i64
    } else {
        0
    };

    let verdict = if tally.compile_error {
        Verdict::CompilationError
    } else if tally.time_exceeded {
        Verdict::TimeLimitExceeded
    } else if tally.memory_exceeded {
        Verdict::MemoryLimitExceeded
    } else if tally.runtime_error {
        Verdict::RuntimeError
    } else if passed_count == total_count {
        Verdict::Accepted
    } else {
        Verdict::WrongAnswer
    };

    GradeReport {
        verdict,
        score,
        passed_count,
        total_count,
        total_time_ms,
        max_memory_kb,
        first_failing_test_id,
        per_test,
    }
}

fn report_unpreparable(request: &GradeRequest, error: &PrepareError) -> GradeReport {
    let per_test: Vec<CaseReport> = request
        .test_cases
        .iter()
        .map(|case| CaseReport {
            test_case_id: case.test_case_id,
            passed: false,
            actual_output: None,
            time_ms: 0,
            memory_kb: None,
            error_message: Some(error.to_string()),
        })
        .collect();

    GradeReport {
        verdict: Verdict::CompilationError,
        score: 0,
        passed_count: 0,
        total_count: per_test.len() as i64,
        total_time_ms: 0,
        max_memory_kb: None,
        first_failing_test_id: per_test.first().map(|c| c.test_case_id),
        per_test,
    }
}

/// Trim both sides, then require exact equality. Whitespace-only differences
/// never fail a case; there is no partial-credit similarity.
fn outputs_match(actual: &str, expected: &str) -> bool {
    actual.trim() == expected.trim()
}

fn error_detail(wrapper_error: Option<String>, stderr: &str, fallback: &str) -> String {
    match wrapper_error.filter(|e| !e.trim().is_empty()) {
        Some(detail) => detail,
        None if !stderr.trim().is_empty() => tail(stderr),
        None => fallback.to_string(),
    }
}

fn tail(text: &str) -> String {
    if text.len() <= STDERR_TAIL_LIMIT {
        text.trim_end().to_string()
    } else {
        let start = text.len() - STDERR_TAIL_LIMIT;
        let boundary = (start..text.len())
            .find(|&i| text.is_char_boundary(i))
            .unwrap_or(text.len());
        format!("...{}", text[boundary..].trim_end())
    }
}

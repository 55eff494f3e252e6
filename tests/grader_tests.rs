mod common;

use std::time::Duration;

use pretty_assertions::assert_eq;

use codegrade::config::SandboxImages;
use codegrade::grader::{GradeCase, GradeError, GradeRequest, Grader, Verdict};
use codegrade::languages::Language;
use codegrade::sandbox::{ExecutionOutcome, SandboxError, SandboxRunner};

use common::{FailingRunner, FakeRunner, ok_result, runtime_error_result};

fn case(id: i64, input: &str, expected: &str, weight: i64) -> GradeCase {
    GradeCase {
        test_case_id: id,
        input_data: input.to_string(),
        expected_output: expected.to_string(),
        weight,
    }
}

fn request(cases: Vec<GradeCase>) -> GradeRequest {
    GradeRequest {
        code: "def solution(x):\n    return x + 1".to_string(),
        language: Language::Python,
        test_cases: cases,
        time_limit: Duration::from_secs(5),
        memory_limit_mb: 256,
        max_score: 100,
    }
}

fn grader(runner: impl SandboxRunner + 'static) -> Grader {
    Grader::new(Box::new(runner), SandboxImages::default())
}

#[test]
fn test_all_passing_is_accepted_with_full_score() {
    let runner = FakeRunner::new(vec![("5", ok_result("6")), ("7", ok_result("8"))]);
    let g = grader(runner);
    let report = g
        .grade(&request(vec![case(1, "5", "6", 1), case(2, "7", "8", 1)]))
        .unwrap();
    assert_eq!(report.verdict, Verdict::Accepted);
    assert_eq!(report.score, 100);
    assert_eq!(report.passed_count, 2);
    assert_eq!(report.total_count, 2);
    assert_eq!(report.first_failing_test_id, None);
    assert_eq!(report.max_memory_kb, Some(2048));
}

#[test]
fn test_whitespace_only_difference_passes() {
    let runner = FakeRunner::new(vec![("5", ok_result("42\n"))]);
    let g = grader(runner);
    let report = g.grade(&request(vec![case(1, "5", "42", 1)])).unwrap();
    assert_eq!(report.verdict, Verdict::Accepted);
    assert!(report.per_test[0].passed);
}

#[test]
fn test_weighted_score_rounding() {
    // max_score 100, weights 1 and 3; only the weight-3 case passes.
    let runner = FakeRunner::new(vec![("a", ok_result("wrong")), ("b", ok_result("right"))]);
    let g = grader(runner);
    let report = g
        .grade(&request(vec![
            case(1, "a", "expected", 1),
            case(2, "b", "right", 3),
        ]))
        .unwrap();
    assert_eq!(report.verdict, Verdict::WrongAnswer);
    assert_eq!(report.score, 75);
    assert_eq!(report.passed_count, 1);
    assert_eq!(report.first_failing_test_id, Some(1));
}

#[test]
fn test_tle_takes_priority_over_wrong_answer() {
    let runner = FakeRunner::new(vec![
        ("a", ExecutionOutcome::TimeExceeded { elapsed_ms: 5000 }),
        ("b", ok_result("wrong")),
    ]);
    let g = grader(runner);
    let report = g
        .grade(&request(vec![
            case(1, "a", "anything", 1),
            case(2, "b", "expected", 1),
        ]))
        .unwrap();
    assert_eq!(report.verdict, Verdict::TimeLimitExceeded);
    // Both cases were still evaluated.
    assert_eq!(report.per_test.len(), 2);
    assert_eq!(
        report.per_test[0].error_message.as_deref(),
        Some("time limit exceeded")
    );
}

#[test]
fn test_tle_takes_priority_over_mle() {
    let runner = FakeRunner::new(vec![
        (
            "a",
            ExecutionOutcome::MemoryExceeded {
                elapsed_ms: 100,
                stderr: String::new(),
            },
        ),
        ("b", ExecutionOutcome::TimeExceeded { elapsed_ms: 5000 }),
    ]);
    let g = grader(runner);
    let report = g
        .grade(&request(vec![case(1, "a", "x", 1), case(2, "b", "x", 1)]))
        .unwrap();
    assert_eq!(report.verdict, Verdict::TimeLimitExceeded);
}

#[test]
fn test_runtime_error_verdict_and_message() {
    let runner = FakeRunner::new(vec![("a", runtime_error_result("ZeroDivisionError"))]);
    let g = grader(runner);
    let report = g.grade(&request(vec![case(1, "a", "x", 1)])).unwrap();
    assert_eq!(report.verdict, Verdict::RuntimeError);
    assert_eq!(report.score, 0);
    assert!(
        report.per_test[0]
            .error_message
            .as_deref()
            .unwrap()
            .contains("ZeroDivisionError")
    );
}

#[test]
fn test_compile_error_skips_remaining_cases() {
    let runner = FakeRunner::new(vec![(
        "a",
        ExecutionOutcome::Success {
            stdout: r#"{"status":"compile_error","output":null,"error":"SyntaxError"}"#.to_string(),
            stderr: String::new(),
            elapsed_ms: 3,
        },
    )]);
    let g = grader(runner);
    let report = g
        .grade(&request(vec![case(1, "a", "x", 1), case(2, "b", "x", 1)]))
        .unwrap();
    assert_eq!(report.verdict, Verdict::CompilationError);
    assert_eq!(report.per_test.len(), 2);
    assert_eq!(
        report.per_test[1].error_message.as_deref(),
        Some("compilation failed")
    );
}

#[test]
fn test_missing_result_line_is_a_runtime_error() {
    let runner = FakeRunner::new(vec![(
        "a",
        ExecutionOutcome::Success {
            stdout: "some chatter but no result\n".to_string(),
            stderr: String::new(),
            elapsed_ms: 3,
        },
    )]);
    let g = grader(runner);
    let report = g.grade(&request(vec![case(1, "a", "x", 1)])).unwrap();
    assert_eq!(report.verdict, Verdict::RuntimeError);
}

#[test]
fn test_report_preserves_declaration_order() {
    let runner = FakeRunner::new(vec![
        ("first", ok_result("1")),
        ("second", ok_result("2")),
        ("third", ok_result("3")),
    ]);
    let g = grader(runner);
    let report = g
        .grade(&request(vec![
            case(10, "first", "1", 1),
            case(20, "second", "2", 1),
            case(30, "third", "3", 1),
        ]))
        .unwrap();
    let ids: Vec<i64> = report.per_test.iter().map(|c| c.test_case_id).collect();
    assert_eq!(ids, vec![10, 20, 30]);
}

#[test]
fn test_grading_is_deterministic() {
    let make = || {
        FakeRunner::new(vec![
            ("a", ok_result("6")),
            ("b", runtime_error_result("boom")),
        ])
    };
    let req = request(vec![case(1, "a", "6", 2), case(2, "b", "7", 3)]);
    let first = grader(make()).grade(&req).unwrap();
    let second = grader(make()).grade(&req).unwrap();
    assert_eq!(first.verdict, second.verdict);
    assert_eq!(first.score, second.score);
    assert_eq!(first.passed_count, second.passed_count);
}

#[test]
fn test_no_test_cases_is_an_explicit_error() {
    let g = grader(FakeRunner::new(vec![]));
    assert!(matches!(
        g.grade(&request(vec![])),
        Err(GradeError::NoTestCases)
    ));
}

#[test]
fn test_sandbox_failure_aborts_instead_of_misreporting() {
    let g = grader(FailingRunner);
    let result = g.grade(&request(vec![case(1, "a", "x", 1)]));
    assert!(matches!(
        result,
        Err(GradeError::Sandbox(SandboxError::Unavailable(_)))
    ));
}

#[test]
fn test_unpreparable_source_is_a_compilation_error() {
    let g = grader(FakeRunner::new(vec![]));
    let mut req = request(vec![case(1, "a", "x", 1)]);
    req.code = "  ".to_string();
    let report = g.grade(&req).unwrap();
    assert_eq!(report.verdict, Verdict::CompilationError);
    assert_eq!(report.score, 0);
}

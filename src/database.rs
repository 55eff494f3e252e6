use std::fs;
use std::path::{Path, PathBuf};

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Row, Sqlite};

use crate::config::ProblemSeed;
use crate::grader::{GradeCase, GradeReport};
use crate::routes::{
    CaseResultRecord, ProblemDetail, ProblemSummary, SampleCase, SubmissionRecord,
    SubmissionRequest, SubmissionsQuery,
};

const DATABASE_NAME: &str = "codegrade.sqlite3";

/// Status values outside the terminal verdict set.
pub const STATUS_PENDING: &str = "pending";
pub const STATUS_RUNNING: &str = "running";

pub fn get_db_path() -> PathBuf {
    use directories::ProjectDirs;

    let proj_dirs = ProjectDirs::from("", "", "codegrade").expect("Unable to find user directory");
    let data_dir = proj_dirs.data_local_dir();

    fs::create_dir_all(data_dir).expect("Failed to create local data dir");

    data_dir.join(DATABASE_NAME)
}

pub async fn init_db(db_path: impl AsRef<Path>) -> sqlx::Result<SqlitePool> {
    let db_url = format!("sqlite://{}?mode=rwc", db_path.as_ref().display()); // rwc = read/write/create
    let db_pool = SqlitePoolOptions::new()
        .max_connections(2)
        .connect(&db_url)
        .await?;

    // PRAGMA statements cannot run inside a transaction
    for pragma_sql in &[
        "PRAGMA foreign_keys = ON;",
        "PRAGMA busy_timeout = 2000;", // 2 seconds timeout for lock contention
        "PRAGMA journal_mode = WAL;",  // Write-Ahead Logging for better concurrency
        "PRAGMA synchronous = NORMAL;",
    ] {
        sqlx::query(pragma_sql).execute(&db_pool).await?;
    }

    let mut tx = db_pool.begin().await?;

    for sql in &[
        r"
        CREATE TABLE IF NOT EXISTS problems (
            id                    INTEGER PRIMARY KEY,
            title                 TEXT    NOT NULL,
            statement             TEXT    NOT NULL,
            difficulty            TEXT    NOT NULL,
            category              TEXT    NOT NULL,
            max_score             INTEGER NOT NULL,
            time_limit_s          INTEGER NOT NULL,
            memory_limit_mb       INTEGER NOT NULL,
            python_template       TEXT    NOT NULL,
            javascript_template   TEXT    NOT NULL,
            java_template         TEXT    NOT NULL,
            total_submissions     INTEGER NOT NULL DEFAULT 0,
            accepted_submissions  INTEGER NOT NULL DEFAULT 0,
            created_time          TEXT    NOT NULL,
            updated_time          TEXT    NOT NULL
        );",
        r"
        CREATE TABLE IF NOT EXISTS test_cases (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            problem_id       INTEGER NOT NULL,
            ordinal          INTEGER NOT NULL,
            input_data       TEXT    NOT NULL,
            expected_output  TEXT    NOT NULL,
            weight           INTEGER NOT NULL,
            is_hidden        INTEGER NOT NULL DEFAULT 0,
            is_sample        INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (problem_id) REFERENCES problems (id) ON DELETE CASCADE
        );",
        "CREATE INDEX IF NOT EXISTS idx_test_cases_problem ON test_cases(problem_id, ordinal);",
        r"
        CREATE TABLE IF NOT EXISTS submissions (
            id                   INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id              INTEGER NOT NULL,
            problem_id           INTEGER NOT NULL,
            source_code          TEXT    NOT NULL,
            language             TEXT    NOT NULL,
            status               TEXT    NOT NULL,
            score                INTEGER NOT NULL DEFAULT 0,
            passed_tests         INTEGER NOT NULL DEFAULT 0,
            total_tests          INTEGER NOT NULL DEFAULT 0,
            time_ms              INTEGER,
            memory_kb            INTEGER,
            error_message        TEXT,
            failed_test_case_id  INTEGER,
            created_time         TEXT    NOT NULL,
            updated_time         TEXT    NOT NULL,
            completed_time       TEXT,
            FOREIGN KEY (problem_id) REFERENCES problems (id)
        );",
        "CREATE INDEX IF NOT EXISTS idx_submissions_created_time ON submissions(created_time);",
        "CREATE INDEX IF NOT EXISTS idx_submissions_user_problem ON submissions(user_id, problem_id);",
        // test_case_id is a historical snapshot, not a foreign key:
        // re-seeding a problem's test cases must not invalidate old results.
        r"
        CREATE TABLE IF NOT EXISTS test_case_results (
            submission_id  INTEGER NOT NULL,
            ordinal        INTEGER NOT NULL,
            test_case_id   INTEGER NOT NULL,
            passed         INTEGER NOT NULL,
            actual_output  TEXT,
            time_ms        INTEGER NOT NULL,
            memory_kb      INTEGER,
            error_message  TEXT,
            PRIMARY KEY (submission_id, ordinal),
            FOREIGN KEY (submission_id) REFERENCES submissions (id) ON DELETE CASCADE
        );",
    ] {
        sqlx::query(sql).execute(tx.as_mut()).await?;
    }

    tx.commit().await?;

    log::info!("Initialized database at {}", db_path.as_ref().display());

    Ok(db_pool)
}

pub fn remove_db(db_path: impl AsRef<Path>) {
    // WAL and SHM files might not exist
    let wal_path = format!("{}-wal", db_path.as_ref().display());
    let shm_path = format!("{}-shm", db_path.as_ref().display());
    let _ = fs::remove_file(wal_path);
    let _ = fs::remove_file(shm_path);

    if let Err(e) = std::fs::remove_file(&db_path) {
        log::warn!(
            "Unable to remove database at {}: {e}",
            db_path.as_ref().display()
        );
    } else {
        log::info!("Removed database at {}", db_path.as_ref().display());
    }
}

/// Upserts the configured problems and replaces their test cases. Aggregate
/// submission counters survive re-seeding.
pub async fn sync_problems(pool: &SqlitePool, problems: &[ProblemSeed]) -> sqlx::Result<()> {
    let now = crate::create_timestamp();
    let mut tx = pool.begin().await?;

    for problem in problems {
        sqlx::query(
            r#"
            INSERT INTO problems (id, title, statement, difficulty, category, max_score,
                                  time_limit_s, memory_limit_mb, python_template,
                                  javascript_template, java_template, created_time, updated_time)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                title = excluded.title,
                statement = excluded.statement,
                difficulty = excluded.difficulty,
                category = excluded.category,
                max_score = excluded.max_score,
                time_limit_s = excluded.time_limit_s,
                memory_limit_mb = excluded.memory_limit_mb,
                python_template = excluded.python_template,
                javascript_template = excluded.javascript_template,
                java_template = excluded.java_template,
                updated_time = excluded.updated_time
            "#,
        )
        .bind(problem.id)
        .bind(&problem.title)
        .bind(&problem.statement)
        .bind(&problem.difficulty)
        .bind(&problem.category)
        .bind(problem.max_score)
        .bind(problem.time_limit_s as i64)
        .bind(problem.memory_limit_mb as i64)
        .bind(&problem.python_template)
        .bind(&problem.javascript_template)
        .bind(&problem.java_template)
        .bind(&now)
        .bind(&now)
        .execute(tx.as_mut())
        .await?;

        sqlx::query("DELETE FROM test_cases WHERE problem_id = ?")
            .bind(problem.id)
            .execute(tx.as_mut())
            .await?;

        for (ordinal, case) in problem.cases.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO test_cases (problem_id, ordinal, input_data, expected_output,
                                        weight, is_hidden, is_sample)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(problem.id)
            .bind(ordinal as i64)
            .bind(&case.input_data)
            .bind(&case.expected_output)
            .bind(case.weight)
            .bind(case.is_hidden)
            .bind(case.is_sample)
            .execute(tx.as_mut())
            .await?;
        }
    }

    tx.commit().await?;
    log::info!("Synchronized {} problems into the database", problems.len());
    Ok(())
}

fn summary_from_row(row: &sqlx::sqlite::SqliteRow) -> ProblemSummary {
    let total: i64 = row.get("total_submissions");
    let accepted: i64 = row.get("accepted_submissions");
    // Acceptance rate needs an explicit zero guard
    let acceptance_rate = if total == 0 {
        0.0
    } else {
        (accepted as f64 / total as f64 * 100.0).round() / 100.0
    };

    ProblemSummary {
        id: row.get("id"),
        title: row.get("title"),
        difficulty: row.get("difficulty"),
        category: row.get("category"),
        max_score: row.get("max_score"),
        total_submissions: total,
        accepted_submissions: accepted,
        acceptance_rate,
    }
}

pub async fn fetch_problem_summaries(pool: &SqlitePool) -> sqlx::Result<Vec<ProblemSummary>> {
    let rows = sqlx::query(
        r#"
        SELECT id, title, difficulty, category, max_score, total_submissions, accepted_submissions
        FROM problems
        ORDER BY id
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(summary_from_row).collect())
}

/// Full problem view for the API: statement, limits, and sample cases only.
/// Hidden and non-sample test cases are never serialized out.
pub async fn fetch_problem_detail(
    pool: &SqlitePool,
    id: i64,
) -> sqlx::Result<Option<ProblemDetail>> {
    let row = sqlx::query(
        r#"
        SELECT id, title, statement, difficulty, category, max_score, time_limit_s,
               memory_limit_mb, python_template, javascript_template, java_template,
               total_submissions, accepted_submissions
        FROM problems
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let sample_rows = sqlx::query(
        r#"
        SELECT input_data, expected_output
        FROM test_cases
        WHERE problem_id = ? AND is_sample = 1
        ORDER BY ordinal
        "#,
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    let sample_cases = sample_rows
        .iter()
        .map(|r| SampleCase {
            input_data: r.get("input_data"),
            expected_output: r.get("expected_output"),
        })
        .collect();

    Ok(Some(ProblemDetail {
        summary: summary_from_row(&row),
        statement: row.get("statement"),
        time_limit_s: row.get("time_limit_s"),
        memory_limit_mb: row.get("memory_limit_mb"),
        python_template: row.get("python_template"),
        javascript_template: row.get("javascript_template"),
        java_template: row.get("java_template"),
        sample_cases,
    }))
}

/// Grading-time view of a problem: its limits plus the ordered test cases.
#[derive(Debug, Clone)]
pub struct ProblemLimits {
    pub max_score: i64,
    pub time_limit_s: u64,
    pub memory_limit_mb: u32,
}

pub async fn fetch_problem_limits(
    pool: &SqlitePool,
    id: i64,
) -> sqlx::Result<Option<ProblemLimits>> {
    let row = sqlx::query("SELECT max_score, time_limit_s, memory_limit_mb FROM problems WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| ProblemLimits {
        max_score: r.get("max_score"),
        time_limit_s: r.get::<i64, _>("time_limit_s") as u64,
        memory_limit_mb: r.get::<i64, _>("memory_limit_mb") as u32,
    }))
}

pub async fn fetch_grade_cases(pool: &SqlitePool, problem_id: i64) -> sqlx::Result<Vec<GradeCase>> {
    let rows = sqlx::query(
        r#"
        SELECT id, input_data, expected_output, weight
        FROM test_cases
        WHERE problem_id = ?
        ORDER BY ordinal
        "#,
    )
    .bind(problem_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|r| GradeCase {
            test_case_id: r.get("id"),
            input_data: r.get("input_data"),
            expected_output: r.get("expected_output"),
            weight: r.get("weight"),
        })
        .collect())
}

pub async fn problem_exists(pool: &SqlitePool, id: i64) -> sqlx::Result<bool> {
    let row = sqlx::query("SELECT 1 FROM problems WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

/// Inserts a fresh pending submission and returns its id.
pub async fn create_submission(
    pool: &SqlitePool,
    request: &SubmissionRequest,
    total_tests: i64,
) -> sqlx::Result<i64> {
    let now = crate::create_timestamp();

    let result = sqlx::query(
        r#"
        INSERT INTO submissions (user_id, problem_id, source_code, language, status,
                                 total_tests, created_time, updated_time)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(request.user_id)
    .bind(request.problem_id)
    .bind(&request.source_code)
    .bind(request.language.as_str())
    .bind(STATUS_PENDING)
    .bind(total_tests)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

fn submission_from_row(row: &sqlx::sqlite::SqliteRow) -> SubmissionRecord {
    SubmissionRecord {
        id: row.get("id"),
        user_id: row.get("user_id"),
        problem_id: row.get("problem_id"),
        source_code: row.get("source_code"),
        language: row.get("language"),
        status: row.get("status"),
        score: row.get("score"),
        passed_tests: row.get("passed_tests"),
        total_tests: row.get("total_tests"),
        time_ms: row.get("time_ms"),
        memory_kb: row.get("memory_kb"),
        error_message: row.get("error_message"),
        failed_test_case_id: row.get("failed_test_case_id"),
        created_time: row.get("created_time"),
        updated_time: row.get("updated_time"),
        completed_time: row.get("completed_time"),
        cases: Vec::new(),
    }
}

/// Fetches one submission with its per-case results in declaration order.
/// `actual_output` is withheld for hidden test cases (and for cases whose
/// test-case row no longer exists, which are treated as hidden).
pub async fn fetch_submission(
    pool: &SqlitePool,
    id: i64,
) -> sqlx::Result<Option<SubmissionRecord>> {
    let row = sqlx::query("SELECT * FROM submissions WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let mut submission = submission_from_row(&row);

    let case_rows = sqlx::query(
        r#"
        SELECT r.test_case_id, r.passed, r.actual_output, r.time_ms, r.memory_kb,
               r.error_message, t.is_hidden
        FROM test_case_results r
        LEFT JOIN test_cases t ON t.id = r.test_case_id
        WHERE r.submission_id = ?
        ORDER BY r.ordinal
        "#,
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    submission.cases = case_rows
        .iter()
        .map(|r| {
            let hidden = r.get::<Option<bool>, _>("is_hidden").unwrap_or(true);
            CaseResultRecord {
                test_case_id: r.get("test_case_id"),
                passed: r.get("passed"),
                actual_output: if hidden {
                    None
                } else {
                    r.get("actual_output")
                },
                time_ms: r.get("time_ms"),
                memory_kb: r.get("memory_kb"),
                error_message: r.get("error_message"),
            }
        })
        .collect();

    Ok(Some(submission))
}

pub async fn fetch_submissions_by_query(
    query: &SubmissionsQuery,
    pool: &SqlitePool,
) -> sqlx::Result<Vec<SubmissionRecord>> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM submissions WHERE 1=1");

    if let Some(user_id) = query.user_id {
        qb.push(" AND user_id = ").push_bind(user_id);
    }
    if let Some(problem_id) = query.problem_id {
        qb.push(" AND problem_id = ").push_bind(problem_id);
    }
    if let Some(ref language) = query.language {
        qb.push(" AND language = ").push_bind(language);
    }
    if let Some(ref status) = query.status {
        qb.push(" AND status = ").push_bind(status);
    }
    if let Some(ref from) = query.from {
        qb.push(" AND created_time >= ").push_bind(from);
    }
    if let Some(ref to) = query.to {
        qb.push(" AND created_time <= ").push_bind(to);
    }
    qb.push(" ORDER BY created_time, id");

    let rows = qb.build().fetch_all(pool).await?;
    Ok(rows.iter().map(submission_from_row).collect())
}

/// pending -> running. Returns false when the submission is not pending
/// anymore; a worker seeing that drops the message instead of regrading.
pub async fn update_submission_to_running(pool: &SqlitePool, id: i64) -> sqlx::Result<bool> {
    let now = crate::create_timestamp();
    let result = sqlx::query(
        "UPDATE submissions SET status = ?, updated_time = ? WHERE id = ? AND status = ?",
    )
    .bind(STATUS_RUNNING)
    .bind(&now)
    .bind(id)
    .bind(STATUS_PENDING)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Persists a completed grading pass: the per-case result rows, the
/// submission summary, and the owning problem's aggregate counters. The
/// counter update is a single SQL increment, never read-modify-write, so
/// concurrent submissions to one problem cannot lose updates.
pub async fn save_grade_report(
    pool: &SqlitePool,
    submission_id: i64,
    problem_id: i64,
    report: &GradeReport,
) -> sqlx::Result<()> {
    let now = crate::create_timestamp();
    let accepted = report.verdict == crate::grader::Verdict::Accepted;
    let first_error = report
        .per_test
        .iter()
        .find_map(|c| c.error_message.clone());
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE submissions
        SET status = ?, score = ?, passed_tests = ?, total_tests = ?, time_ms = ?,
            memory_kb = ?, error_message = ?, failed_test_case_id = ?,
            updated_time = ?, completed_time = ?
        WHERE id = ?
        "#,
    )
    .bind(report.verdict.as_str())
    .bind(report.score)
    .bind(report.passed_count)
    .bind(report.total_count)
    .bind(report.total_time_ms as i64)
    .bind(report.max_memory_kb.map(|m| m as i64))
    .bind(&first_error)
    .bind(report.first_failing_test_id)
    .bind(&now)
    .bind(&now)
    .bind(submission_id)
    .execute(tx.as_mut())
    .await?;

    for (ordinal, case) in report.per_test.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO test_case_results (submission_id, ordinal, test_case_id, passed,
                                           actual_output, time_ms, memory_kb, error_message)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(submission_id)
        .bind(ordinal as i64)
        .bind(case.test_case_id)
        .bind(case.passed)
        .bind(&case.actual_output)
        .bind(case.time_ms as i64)
        .bind(case.memory_kb.map(|m| m as i64))
        .bind(&case.error_message)
        .execute(tx.as_mut())
        .await?;
    }

    sqlx::query(
        r#"
        UPDATE problems
        SET total_submissions = total_submissions + 1,
            accepted_submissions = accepted_submissions + ?
        WHERE id = ?
        "#,
    )
    .bind(accepted as i64)
    .bind(problem_id)
    .execute(tx.as_mut())
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Terminal failure of the grading machinery. The stored message is the
/// user-facing one; operator detail goes to the log, not the database.
pub async fn mark_submission_failed(
    pool: &SqlitePool,
    id: i64,
    user_message: &str,
) -> sqlx::Result<()> {
    let now = crate::create_timestamp();
    sqlx::query(
        r#"
        UPDATE submissions
        SET status = ?, error_message = ?, updated_time = ?, completed_time = ?
        WHERE id = ?
        "#,
    )
    .bind(crate::grader::Verdict::RuntimeError.as_str())
    .bind(user_message)
    .bind(&now)
    .bind(&now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn count_test_cases(pool: &SqlitePool, problem_id: i64) -> sqlx::Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM test_cases WHERE problem_id = ?")
        .bind(problem_id)
        .fetch_one(pool)
        .await?;
    Ok(row.get("n"))
}

//! Plumbing shared by the integration test binaries: isolated per-test
//! databases and scripted sandbox runners.
#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use serde_json::json;
use sqlx::sqlite::SqlitePool;

use codegrade::database as db;
use codegrade::languages::ProgramArtifact;
use codegrade::sandbox::{ExecutionOutcome, ResourceLimits, SandboxError, SandboxRunner};

// Global counter to ensure unique test database names
static TEST_DB_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Creates a fresh database file under the temp dir; the returned guard
/// removes it (and the WAL/SHM siblings) when the test ends.
pub async fn create_test_db(prefix: &str) -> (SqlitePool, TestDbGuard) {
    let test_id = TEST_DB_COUNTER.fetch_add(1, Ordering::SeqCst);
    let db_path = std::env::temp_dir().join(format!(
        "codegrade_{}_{}_{}.db",
        prefix,
        std::process::id(),
        test_id
    ));
    let _ = fs::remove_file(&db_path);

    let db_pool = db::init_db(&db_path).await.unwrap();
    (db_pool, TestDbGuard { db_path })
}

pub struct TestDbGuard {
    db_path: PathBuf,
}

impl Drop for TestDbGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(format!("{}-wal", self.db_path.display()));
        let _ = fs::remove_file(format!("{}-shm", self.db_path.display()));
        let _ = fs::remove_file(&self.db_path);
    }
}

/// Scripted runner: maps each test case's input payload to a canned outcome.
pub struct FakeRunner {
    outcomes: HashMap<String, ExecutionOutcome>,
}

impl FakeRunner {
    pub fn new(outcomes: Vec<(&str, ExecutionOutcome)>) -> Self {
        Self {
            outcomes: outcomes
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        }
    }
}

impl SandboxRunner for FakeRunner {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn execute(
        &self,
        _artifact: &ProgramArtifact,
        stdin_payload: &str,
        _limits: &ResourceLimits,
    ) -> Result<ExecutionOutcome, SandboxError> {
        self.outcomes
            .get(stdin_payload)
            .cloned()
            .ok_or_else(|| SandboxError::Unavailable("unscripted input".to_string()))
    }
}

/// Runner standing in for a dead isolation backend.
pub struct FailingRunner;

impl SandboxRunner for FailingRunner {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn execute(
        &self,
        _artifact: &ProgramArtifact,
        _stdin_payload: &str,
        _limits: &ResourceLimits,
    ) -> Result<ExecutionOutcome, SandboxError> {
        Err(SandboxError::Unavailable("no backend".to_string()))
    }
}

pub fn ok_result(output: &str) -> ExecutionOutcome {
    ExecutionOutcome::Success {
        stdout: format!(
            "{}\n",
            json!({
                "status": "ok",
                "output": output,
                "error": null,
                "memory_kb": 2048,
            })
        ),
        stderr: String::new(),
        elapsed_ms: 10,
    }
}

pub fn runtime_error_result(message: &str) -> ExecutionOutcome {
    ExecutionOutcome::Success {
        stdout: format!(
            "{}\n",
            json!({
                "status": "runtime_error",
                "output": null,
                "error": message,
            })
        ),
        stderr: String::new(),
        elapsed_ms: 5,
    }
}

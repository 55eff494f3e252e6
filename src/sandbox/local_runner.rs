use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::languages::ProgramArtifact;

use super::process::run_supervised;
use super::runner::{ExecutionOutcome, ResourceLimits, SandboxError, SandboxRunner};

/// A runner that executes code directly on the host without isolation
///
/// LocalRunner enforces the wall-clock limit but provides no memory cap, no
/// network denial, and no filesystem restrictions. It exists so development
/// and test environments without a container backend can exercise the grading
/// pipeline, and is only constructible when the configuration explicitly
/// allows unsandboxed execution.
pub struct LocalRunner {
    sequence: AtomicU64,
    work_root: PathBuf,
}

impl LocalRunner {
    pub fn build(id: u8) -> Result<Self, SandboxError> {
        let work_root = std::env::temp_dir()
            .join("codegrade-local")
            .join(id.to_string());
        fs::create_dir_all(&work_root)
            .map_err(|e| SandboxError::Setup(format!("failed to create work root: {e}")))?;

        log::info!("LocalRunner {id} initialized successfully");
        log::warn!("LocalRunner provides NO security isolation - use only in trusted environments");
        Ok(Self {
            sequence: AtomicU64::new(0),
            work_root,
        })
    }
}

impl SandboxRunner for LocalRunner {
    fn name(&self) -> &'static str {
        "local-unsandboxed"
    }

    fn execute(
        &self,
        artifact: &ProgramArtifact,
        stdin_payload: &str,
        limits: &ResourceLimits,
    ) -> Result<ExecutionOutcome, SandboxError> {
        if artifact.command.is_empty() {
            return Err(SandboxError::Setup("empty program command".to_string()));
        }

        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let work_dir = self.work_root.join(seq.to_string());
        fs::create_dir_all(&work_dir)
            .map_err(|e| SandboxError::Setup(format!("failed to create work dir: {e}")))?;
        let _guard = WorkDirGuard { dir: &work_dir };

        for (file_name, contents) in &artifact.files {
            fs::write(work_dir.join(file_name), contents)
                .map_err(|e| SandboxError::Setup(format!("failed to write {file_name}: {e}")))?;
        }

        let mut command = Command::new(&artifact.command[0]);
        command.args(&artifact.command[1..]).current_dir(&work_dir);

        let exit = run_supervised(command, stdin_payload, limits.time_limit, || {})
            .map_err(|e| SandboxError::Setup(format!("failed to spawn program: {e}")))?;

        let elapsed_ms = exit.elapsed.as_millis() as u64;

        if exit.timed_out {
            return Ok(ExecutionOutcome::TimeExceeded { elapsed_ms });
        }

        let status = exit
            .status
            .ok_or_else(|| SandboxError::Setup("program exited without a status".to_string()))?;

        if status.success() {
            Ok(ExecutionOutcome::Success {
                stdout: exit.stdout,
                stderr: exit.stderr,
                elapsed_ms,
            })
        } else {
            // No cgroup accounting here, so an OOM kill is indistinguishable
            // from any other crash.
            Ok(ExecutionOutcome::Crashed {
                exit_code: status.code(),
                stderr: exit.stderr,
                elapsed_ms,
            })
        }
    }
}

struct WorkDirGuard<'a> {
    dir: &'a std::path::Path,
}

impl Drop for WorkDirGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(self.dir) {
            log::error!("Failed to remove work dir {}: {e}", self.dir.display());
        }
    }
}

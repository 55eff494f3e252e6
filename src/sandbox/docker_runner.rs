use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::languages::ProgramArtifact;

use super::process::run_supervised;
use super::runner::{ExecutionOutcome, ResourceLimits, SandboxError, SandboxRunner};

/// Extra wall-clock slack beyond the declared time limit, covering container
/// start-up so a well-behaved program at the limit is not misreported.
const WALL_CLOCK_GRACE: Duration = Duration::from_millis(1500);

const PIDS_LIMIT: u32 = 64;

/// Exit status delivered when the kernel OOM-kills the container's init
/// process (128 + SIGKILL).
const OOM_EXIT_CODE: i32 = 137;

/// A sandbox environment executing untrusted code in one-shot Docker
/// containers
///
/// Every invocation runs in a fresh container with networking disabled and
/// memory capped; wall-clock time is enforced externally by polling the
/// container process against a deadline, mirroring how the platform's
/// container backend has always policed time limits. The container and any
/// scratch directory are force-removed on every exit path.
pub struct DockerRunner {
    /// Unique identifier for this runner instance
    id: u8,
    /// Per-invocation sequence number, used to derive container names
    sequence: AtomicU64,
    /// Root directory for per-invocation scratch space
    scratch_root: PathBuf,
}

impl DockerRunner {
    pub fn build(id: u8) -> Result<Self, SandboxError> {
        let scratch_root = std::env::temp_dir().join("codegrade").join(id.to_string());
        fs::create_dir_all(&scratch_root)
            .map_err(|e| SandboxError::Setup(format!("failed to create scratch root: {e}")))?;

        log::info!("DockerRunner {id} initialized successfully");
        Ok(Self {
            id,
            sequence: AtomicU64::new(0),
            scratch_root,
        })
    }

    fn next_container_name(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("codegrade-{}-{}", self.id, seq)
    }

    fn materialize_files(
        &self,
        name: &str,
        artifact: &ProgramArtifact,
    ) -> Result<Option<PathBuf>, SandboxError> {
        if artifact.files.is_empty() {
            return Ok(None);
        }

        let dir = self.scratch_root.join(name);
        fs::create_dir_all(&dir)
            .map_err(|e| SandboxError::Setup(format!("failed to create scratch dir: {e}")))?;
        for (file_name, contents) in &artifact.files {
            fs::write(dir.join(file_name), contents)
                .map_err(|e| SandboxError::Setup(format!("failed to write {file_name}: {e}")))?;
        }
        Ok(Some(dir))
    }

    fn was_oom_killed(name: &str) -> bool {
        Command::new("docker")
            .args(["inspect", "-f", "{{.State.OOMKilled}}", name])
            .output()
            .map(|out| String::from_utf8_lossy(&out.stdout).trim() == "true")
            .unwrap_or(false)
    }
}

impl SandboxRunner for DockerRunner {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn execute(
        &self,
        artifact: &ProgramArtifact,
        stdin_payload: &str,
        limits: &ResourceLimits,
    ) -> Result<ExecutionOutcome, SandboxError> {
        let container_name = self.next_container_name();
        let work_dir = self.materialize_files(&container_name, artifact)?;
        let _guard = ContainerGuard {
            name: &container_name,
            work_dir: work_dir.as_deref(),
        };

        let memory_arg = format!("{}m", limits.memory_limit_mb);
        let pids_arg = PIDS_LIMIT.to_string();
        let mut command = Command::new("docker");
        command
            .args(["run", "-i", "--name", &container_name])
            .args(["--network", "none"])
            .args(["--memory", &memory_arg, "--memory-swap", &memory_arg])
            .args(["--pids-limit", &pids_arg]);
        if let Some(dir) = &work_dir {
            command
                .arg("-v")
                .arg(format!("{}:/work", dir.display()))
                .args(["-w", "/work"]);
        }
        command.arg(&artifact.image).args(&artifact.command);

        let deadline = limits.time_limit + WALL_CLOCK_GRACE;
        let kill_name = container_name.clone();
        let exit = run_supervised(command, stdin_payload, deadline, move || {
            let _ = Command::new("docker").args(["kill", &kill_name]).output();
        })
        .map_err(|e| SandboxError::Setup(format!("failed to spawn docker run: {e}")))?;

        let elapsed_ms = exit.elapsed.as_millis() as u64;

        if exit.timed_out {
            log::debug!("Container {container_name} hit the wall-clock deadline");
            return Ok(ExecutionOutcome::TimeExceeded { elapsed_ms });
        }

        let status = exit.status.ok_or_else(|| {
            SandboxError::Setup("docker run exited without a status".to_string())
        })?;

        if status.success() {
            return Ok(ExecutionOutcome::Success {
                stdout: exit.stdout,
                stderr: exit.stderr,
                elapsed_ms,
            });
        }

        if status.code() == Some(OOM_EXIT_CODE) || Self::was_oom_killed(&container_name) {
            log::debug!("Container {container_name} was OOM-killed");
            return Ok(ExecutionOutcome::MemoryExceeded {
                elapsed_ms,
                stderr: exit.stderr,
            });
        }

        Ok(ExecutionOutcome::Crashed {
            exit_code: status.code(),
            stderr: exit.stderr,
            elapsed_ms,
        })
    }
}

/// Removes the container and scratch directory on every exit path, including
/// panics and early returns.
struct ContainerGuard<'a> {
    name: &'a str,
    work_dir: Option<&'a Path>,
}

impl Drop for ContainerGuard<'_> {
    fn drop(&mut self) {
        let removed = Command::new("docker")
            .args(["rm", "-f", self.name])
            .output();
        if let Err(e) = removed {
            log::error!("Failed to remove container {}: {e}", self.name);
        }
        if let Some(dir) = self.work_dir {
            if let Err(e) = fs::remove_dir_all(dir) {
                log::error!("Failed to remove scratch dir {}: {e}", dir.display());
            }
        }
    }
}

use std::time::Duration;

use crate::languages::ProgramArtifact;

/// Limits enforced on one execution.
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimits {
    pub time_limit: Duration,
    pub memory_limit_mb: u32,
}

/// Raw outcome of one sandboxed execution. `Crashed` means the wrapper process
/// itself died; user-code exceptions are reported through the wrapper's result
/// line and still arrive as `Success`.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Success {
        stdout: String,
        stderr: String,
        elapsed_ms: u64,
    },
    TimeExceeded {
        elapsed_ms: u64,
    },
    MemoryExceeded {
        elapsed_ms: u64,
        stderr: String,
    },
    Crashed {
        exit_code: Option<i32>,
        stderr: String,
        elapsed_ms: u64,
    },
}

/// Infrastructure-level failures. These are fatal to the grading pass and are
/// never reported as a fault of the submitted code.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("isolation backend unavailable: {0}")]
    Unavailable(String),
    #[error("sandbox setup failed: {0}")]
    Setup(String),
}

/// Trait for different sandbox execution implementations
///
/// Abstracts the mechanics of running one prepared program against one input
/// payload under resource limits - from full container isolation to plain
/// process execution in development environments. Implementations must tear
/// down every execution resource (processes, containers, scratch files) on all
/// exit paths, and must be safe to call concurrently from different instances.
pub trait SandboxRunner: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs the artifact once, feeding `stdin_payload` as standard input.
    fn execute(
        &self,
        artifact: &ProgramArtifact,
        stdin_payload: &str,
        limits: &ResourceLimits,
    ) -> Result<ExecutionOutcome, SandboxError>;
}

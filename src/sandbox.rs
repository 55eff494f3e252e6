mod docker_runner;
mod local_runner;
mod process;
mod runner;

use docker_runner::DockerRunner;
use local_runner::LocalRunner;
pub use runner::{ExecutionOutcome, ResourceLimits, SandboxError, SandboxRunner};

use crate::config::SandboxConfig;

/// Creates a sandbox runner for one worker slot.
///
/// Probes for a reachable Docker daemon and builds a [`DockerRunner`] when one
/// is found. Without a daemon the runner fails closed: the unsandboxed
/// [`LocalRunner`] is only constructed when `sandbox.allow_unsandboxed` is set
/// in the configuration, and never by default.
pub fn create_sandbox_runner(
    id: u8,
    config: &SandboxConfig,
) -> Result<Box<dyn SandboxRunner>, SandboxError> {
    let docker_available = std::process::Command::new("docker")
        .arg("version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false);

    if docker_available {
        log::info!("Creating DockerRunner {id} (full isolation mode)");
        let runner = DockerRunner::build(id)?;
        Ok(Box::new(runner))
    } else if config.allow_unsandboxed {
        log::info!("Creating LocalRunner {id} (UNSANDBOXED development mode)");
        let runner = LocalRunner::build(id)?;
        Ok(Box::new(runner))
    } else {
        Err(SandboxError::Unavailable(
            "docker daemon is not reachable and unsandboxed execution is disabled".to_string(),
        ))
    }
}

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

/// What happened to a supervised child process.
#[derive(Debug)]
pub(super) struct SupervisedExit {
    pub timed_out: bool,
    pub status: Option<ExitStatus>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Spawns `command` with piped stdio, feeds it `stdin_payload`, and waits for
/// it to exit or for the deadline to pass. On deadline `on_deadline` is given
/// a chance to kill the process externally (e.g. `docker kill`) before the
/// child handle itself is killed; either way the child is fully reaped and
/// both output pipes are drained before returning.
pub(super) fn run_supervised(
    mut command: Command,
    stdin_payload: &str,
    deadline: Duration,
    on_deadline: impl FnOnce(),
) -> std::io::Result<SupervisedExit> {
    command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let start = Instant::now();
    let mut child = command.spawn()?;

    let stdin_handle = feed_stdin(&mut child, stdin_payload);
    let stdout_handle = drain_pipe(child.stdout.take());
    let stderr_handle = drain_pipe(child.stderr.take());

    let mut timed_out = false;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break Some(status);
        }
        if start.elapsed() >= deadline {
            timed_out = true;
            on_deadline();
            let _ = child.kill();
            let _ = child.wait();
            break None;
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    let elapsed = start.elapsed();
    let _ = stdin_handle.join();
    let stdout = stdout_handle.join().unwrap_or_default();
    let stderr = stderr_handle.join().unwrap_or_default();

    Ok(SupervisedExit {
        timed_out,
        status,
        stdout,
        stderr,
        elapsed,
    })
}

/// Writing the payload from a separate thread avoids deadlocking against a
/// child that fills its output pipes before reading stdin.
fn feed_stdin(child: &mut Child, payload: &str) -> std::thread::JoinHandle<()> {
    let stdin = child.stdin.take();
    let payload = payload.to_string();
    std::thread::spawn(move || {
        if let Some(mut stdin) = stdin {
            let _ = stdin.write_all(payload.as_bytes());
            let _ = stdin.flush();
        }
        // Dropping the handle closes the pipe so readers of stdin see EOF.
    })
}

fn drain_pipe<R: Read + Send + 'static>(pipe: Option<R>) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut content = String::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_string(&mut content);
        }
        content
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_output_is_captured() {
        let mut cmd = Command::new("/bin/sh");
        cmd.args(["-c", "cat; echo done"]);
        let exit = run_supervised(cmd, "hello\n", Duration::from_secs(5), || {}).unwrap();
        assert!(!exit.timed_out);
        assert!(exit.status.unwrap().success());
        assert_eq!(exit.stdout, "hello\ndone\n");
    }

    #[test]
    fn test_deadline_kills_child() {
        let mut cmd = Command::new("/bin/sh");
        cmd.args(["-c", "sleep 10"]);
        let exit = run_supervised(cmd, "", Duration::from_millis(200), || {}).unwrap();
        assert!(exit.timed_out);
        assert!(exit.status.is_none());
        assert!(exit.elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_nonzero_exit_is_reported() {
        let mut cmd = Command::new("/bin/sh");
        cmd.args(["-c", "echo oops >&2; exit 3"]);
        let exit = run_supervised(cmd, "", Duration::from_secs(5), || {}).unwrap();
        assert!(!exit.timed_out);
        assert_eq!(exit.status.unwrap().code(), Some(3));
        assert_eq!(exit.stderr, "oops\n");
    }
}

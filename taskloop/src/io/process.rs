//! Child process helpers: bounded command runs and long-lived service children.

use std::fs::{self, File, OpenOptions};
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr kept in memory; the rest is drained and discarded.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs()))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let stdout = join_output(stdout_handle).context("join stdout")?;
    let stderr = join_output(stderr_handle).context("join stderr")?;

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        timed_out,
    })
}

fn join_output(handle: thread::JoinHandle<Result<Vec<u8>>>) -> Result<Vec<u8>> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let keep = n.min(limit.saturating_sub(buf.len()));
        buf.extend_from_slice(&chunk[..keep]);
    }
    Ok(buf)
}

/// Spawn a long-running child with stdout and stderr appended to `log_path`.
#[instrument(skip_all, fields(program = %argv.first().map(String::as_str).unwrap_or("")))]
pub fn spawn_logged(argv: &[String], workdir: &Path, log_path: &Path) -> Result<Child> {
    let Some((program, args)) = argv.split_first() else {
        bail!("empty command");
    };
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let log = open_append(log_path)?;
    let log_err = log
        .try_clone()
        .with_context(|| format!("clone handle {}", log_path.display()))?;
    let child = Command::new(program)
        .args(args)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .spawn()
        .with_context(|| format!("spawn {}", argv.join(" ")))?;
    debug!(pid = child.id(), "child spawned");
    Ok(child)
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))
}

/// Ask a child to exit, then kill it if it is still alive after `grace`.
#[instrument(skip_all, fields(pid = child.id(), grace_secs = grace.as_secs()))]
pub fn terminate_gracefully(child: &mut Child, grace: Duration) -> Result<ExitStatus> {
    if let Some(status) = child.try_wait().context("poll child")? {
        return Ok(status);
    }
    request_stop(child);
    if let Some(status) = child.wait_timeout(grace).context("wait for child")? {
        debug!("child exited within grace period");
        return Ok(status);
    }
    warn!("child ignored stop request, killing");
    child.kill().context("kill child")?;
    child.wait().context("wait child after kill")
}

#[cfg(unix)]
fn request_stop(child: &Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Ok(pid) = i32::try_from(child.id()) else {
        return;
    };
    if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        warn!(err = %err, "SIGTERM failed");
    }
}

#[cfg(not(unix))]
fn request_stop(_child: &Child) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn captures_output_and_status() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo out; echo err >&2; exit 3"]);
        let out = run_command_with_timeout(cmd, Duration::from_secs(10), 1024).unwrap();
        assert_eq!(out.status.code(), Some(3));
        assert_eq!(out.stdout_text(), "out\n");
        assert_eq!(out.stderr_text(), "err");
        assert!(!out.timed_out);
    }

    #[test]
    fn kills_on_timeout() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 5"]);
        let start = Instant::now();
        let out = run_command_with_timeout(cmd, Duration::from_millis(200), 1024).unwrap();
        assert!(out.timed_out);
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn truncates_output_to_limit() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "printf 'abcdefghij'"]);
        let out = run_command_with_timeout(cmd, Duration::from_secs(10), 4).unwrap();
        assert_eq!(out.stdout, b"abcd");
    }

    #[test]
    fn spawn_logged_appends_to_log_and_terminates() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = temp.path().join("Logs").join("svc.log");
        let argv: Vec<String> = ["sh", "-c", "echo started; sleep 30"]
            .into_iter()
            .map(String::from)
            .collect();
        let mut child = spawn_logged(&argv, temp.path(), &log).unwrap();
        thread::sleep(Duration::from_millis(300));
        let status = terminate_gracefully(&mut child, Duration::from_secs(2)).unwrap();
        assert!(!status.success());
        let text = fs::read_to_string(&log).unwrap();
        assert!(text.contains("started"));
    }
}

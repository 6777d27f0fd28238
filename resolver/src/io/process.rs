//! Helpers for running child processes with timeouts and bounded output.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Exit code, or `None` when the child was killed (timeout or signal).
    pub fn exit_code(&self) -> Option<i32> {
        if self.timed_out {
            return None;
        }
        self.status.code()
    }

    /// Stdout followed by stderr, lossily decoded, with truncation notices.
    pub fn combined(&self) -> String {
        let mut buf = String::from_utf8_lossy(&self.stdout).into_owned();
        buf.push_str(&truncated_notice("stdout", self.stdout_truncated));
        buf.push_str(&String::from_utf8_lossy(&self.stderr));
        buf.push_str(&truncated_notice("stderr", self.stderr_truncated));
        buf
    }
}

fn truncated_notice(stream: &str, bytes: usize) -> String {
    if bytes > 0 {
        format!("\n[{stream} truncated {bytes} bytes]\n")
    } else {
        String::new()
    }
}

/// Build a [`Command`] that runs `command` through the host shell.
pub fn shell_command(command: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    isolate_process_group(&mut cmd);

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

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        child_stdin.write_all(input).context("write stdin")?;
        // Dropping closes the pipe so the child sees EOF.
        drop(child_stdin);
    }

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            kill_process_tree(&mut child).context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

/// Put the child in a new process group led by itself, so a timeout can
/// reach everything a shell command started.
#[cfg(unix)]
fn isolate_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn isolate_process_group(_cmd: &mut Command) {}

/// Kill the child and every process in its group. Grandchildren that keep the
/// output pipes open would otherwise block the reader threads.
#[cfg(unix)]
fn kill_process_tree(child: &mut Child) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pgid = i32::try_from(child.id()).context("child pid out of range")?;
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        // The group is already gone once every member has exited.
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(err) => {
            warn!(err = %err, "killpg failed, killing shell only");
            child.kill().context("kill child")
        }
    }
}

#[cfg(not(unix))]
fn kill_process_tree(child: &mut Child) -> Result<()> {
    child.kill().context("kill child")
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn captures_stdout_and_stderr() {
        let output = run_command_with_timeout(
            shell_command("echo out; echo err 1>&2"),
            None,
            Duration::from_secs(10),
            1000,
        )
        .expect("run");
        assert_eq!(output.exit_code(), Some(0));
        assert_eq!(output.combined(), "out\nerr\n");
    }

    #[test]
    fn feeds_stdin_to_child() {
        let output = run_command_with_timeout(
            shell_command("cat"),
            Some(b"prompt text".as_slice()),
            Duration::from_secs(10),
            1000,
        )
        .expect("run");
        assert_eq!(String::from_utf8_lossy(&output.stdout), "prompt text");
    }

    #[test]
    fn truncates_output_beyond_limit() {
        let output = run_command_with_timeout(
            shell_command("printf 0123456789"),
            None,
            Duration::from_secs(10),
            4,
        )
        .expect("run");
        assert_eq!(output.stdout, b"0123");
        assert_eq!(output.stdout_truncated, 6);
        assert!(output.combined().contains("[stdout truncated 6 bytes]"));
    }

    #[test]
    fn timeout_kills_commands_started_by_the_shell() {
        let started = Instant::now();
        let output = run_command_with_timeout(
            shell_command("sleep 4; echo done"),
            None,
            Duration::from_millis(300),
            1000,
        )
        .expect("run");
        assert!(output.timed_out);
        assert!(started.elapsed() < Duration::from_secs(2), "{:?}", started.elapsed());
        assert!(!output.combined().contains("done"));
    }

    #[test]
    fn kills_child_on_timeout() {
        let output = run_command_with_timeout(
            shell_command("sleep 2"),
            None,
            Duration::from_millis(200),
            1000,
        )
        .expect("run");
        assert!(output.timed_out);
        assert_eq!(output.exit_code(), None);
    }
}

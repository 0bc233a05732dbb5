//! Child processes with a wall-clock bound and capped output capture.
//!
//! Both RUN instructions and command-backed capabilities go through
//! [`run_command_with_timeout`]. Pipes are drained on reader threads for the
//! whole lifetime of the child so a chatty process can never block on a full
//! pipe while we wait for it.

use std::fmt;
use std::io::{Read, Write};
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

const READ_CHUNK: usize = 8192;

/// What a finished (or killed) child left behind.
#[derive(Debug)]
pub struct ChildOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Bytes read past the cap and dropped.
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl ChildOutput {
    /// Exit code, or `-1` when the process ended without one (killed by signal).
    pub fn exit_code(&self) -> i64 {
        self.status.code().map_or(-1, i64::from)
    }

    pub fn stdout_truncated_notice(&self) -> String {
        truncated_notice("stdout", self.stdout_truncated)
    }

    pub fn stderr_truncated_notice(&self) -> String {
        truncated_notice("stderr", self.stderr_truncated)
    }
}

fn truncated_notice(stream: &str, bytes: usize) -> String {
    if bytes == 0 {
        return String::new();
    }
    format!("\n[{stream} truncated {bytes} bytes]")
}

/// The program could not be started at all (not found, not executable).
#[derive(Debug)]
pub struct SpawnFailed {
    pub program: String,
    pub source: std::io::Error,
}

impl fmt::Display for SpawnFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to spawn {}: {}", self.program, self.source)
    }
}

impl std::error::Error for SpawnFailed {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Captured bytes of one stream plus the count dropped past the cap.
type Captured = (Vec<u8>, usize);

/// How long readers get to hit EOF after a timed-out child is killed.
const KILL_GRACE: Duration = Duration::from_millis(100);

/// Reader threads draining a child's stdout and stderr into shared buffers.
///
/// Collection never joins the threads: a grandchild that inherited the pipes
/// can keep them open long after the child is gone, so whatever has been read
/// by the deadline is what the caller gets.
struct Drain {
    stdout: Arc<Mutex<Captured>>,
    stderr: Arc<Mutex<Captured>>,
    closed: Receiver<()>,
}

impl Drain {
    fn start(child: &mut Child, cap: usize) -> Result<Self> {
        let stdout: ChildStdout = child.stdout.take().ok_or_else(|| anyhow!("stdout not piped"))?;
        let stderr: ChildStderr = child.stderr.take().ok_or_else(|| anyhow!("stderr not piped"))?;
        let (closed_tx, closed) = mpsc::channel();
        let drain = Self {
            stdout: Arc::default(),
            stderr: Arc::default(),
            closed,
        };
        spawn_reader(stdout, cap, Arc::clone(&drain.stdout), closed_tx.clone());
        spawn_reader(stderr, cap, Arc::clone(&drain.stderr), closed_tx);
        Ok(drain)
    }

    /// Wait until both streams hit EOF or `deadline` passes, then take what
    /// was read.
    fn finish(self, deadline: Instant) -> (Captured, Captured) {
        let mut open = 2;
        while open > 0 {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.closed.recv_timeout(left) {
                Ok(()) => open -= 1,
                Err(RecvTimeoutError::Timeout) => {
                    warn!(open, "output pipes still held open, keeping partial output");
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        (take_captured(&self.stdout), take_captured(&self.stderr))
    }
}

fn spawn_reader(
    reader: impl Read + Send + 'static,
    cap: usize,
    sink: Arc<Mutex<Captured>>,
    closed: Sender<()>,
) {
    thread::spawn(move || {
        if let Err(err) = capture_capped(reader, cap, &sink) {
            debug!(err = %format!("{err:#}"), "output reader stopped");
        }
        // The collector may already have given up on us.
        let _ = closed.send(());
    });
}

fn take_captured(sink: &Mutex<Captured>) -> Captured {
    match sink.lock() {
        Ok(mut captured) => std::mem::take(&mut *captured),
        Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
    }
}

/// Run `cmd`, killing it once `timeout` elapses.
///
/// `stdin` is written to the child and then closed; `None` gives the child a
/// null stdin. At most `output_limit_bytes` of each stream is kept; the rest
/// is read and discarded. A spawn failure is returned as [`SpawnFailed`], a
/// timeout is reported through [`ChildOutput::timed_out`]. The call returns
/// within `timeout` plus a short grace period even when descendants of the
/// child keep its output pipes open.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<ChildOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

    let started = Instant::now();
    let mut child = spawn(&mut cmd)?;
    let drain = Drain::start(&mut child, output_limit_bytes)?;
    if let Some(input) = stdin {
        feed_stdin(&mut child, input)?;
    }
    let (status, timed_out) = wait_bounded(&mut child, timeout)?;
    let deadline = if timed_out {
        Instant::now() + KILL_GRACE
    } else {
        (started + timeout).max(Instant::now() + KILL_GRACE)
    };
    let ((stdout, stdout_truncated), (stderr, stderr_truncated)) = drain.finish(deadline);

    if stdout_truncated + stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "child output capped");
    }
    debug!(exit_code = ?status.code(), timed_out, "child finished");
    Ok(ChildOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

fn spawn(cmd: &mut Command) -> Result<Child> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    debug!(%program, "spawning child");
    cmd.spawn().map_err(|source| {
        warn!(%program, err = %source, "spawn failed");
        SpawnFailed { program, source }.into()
    })
}

/// Write `input` on its own thread so a child that never reads cannot hold
/// us past the time bound.
fn feed_stdin(child: &mut Child, input: &[u8]) -> Result<()> {
    let mut pipe = child.stdin.take().ok_or_else(|| anyhow!("stdin not piped"))?;
    let input = input.to_vec();
    thread::spawn(move || {
        // A child may exit without reading; a broken pipe is not our failure.
        if let Err(err) = pipe.write_all(&input) {
            debug!(err = %err, "child closed stdin early");
        }
    });
    Ok(())
}

fn wait_bounded(child: &mut Child, timeout: Duration) -> Result<(ExitStatus, bool)> {
    if let Some(status) = child.wait_timeout(timeout).context("wait for child")? {
        return Ok((status, false));
    }
    warn!(timeout_secs = timeout.as_secs(), "child exceeded its time bound, killing");
    child.kill().context("kill child")?;
    let status = child.wait().context("reap killed child")?;
    Ok((status, true))
}

fn capture_capped(mut reader: impl Read, cap: usize, sink: &Mutex<Captured>) -> Result<()> {
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut chunk).context("read child output")?;
        if n == 0 {
            return Ok(());
        }
        let mut captured = sink
            .lock()
            .map_err(|_| anyhow!("output buffer lock poisoned"))?;
        let (kept, dropped) = &mut *captured;
        let take = n.min(cap.saturating_sub(kept.len()));
        kept.extend_from_slice(&chunk[..take]);
        *dropped += n - take;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", script]);
        cmd
    }

    #[test]
    fn captures_both_streams_and_exit_code() {
        let out = run_command_with_timeout(
            sh("echo out; echo err >&2; exit 3"),
            None,
            Duration::from_secs(5),
            1000,
        )
        .expect("run");
        assert_eq!(out.exit_code(), 3);
        assert_eq!(out.stdout, b"out\n");
        assert_eq!(out.stderr, b"err\n");
        assert!(!out.timed_out);
    }

    #[test]
    fn slow_child_is_killed() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let out =
            run_command_with_timeout(cmd, None, Duration::from_millis(100), 1000).expect("run");
        assert!(out.timed_out);
        assert!(!out.status.success());
    }

    #[test]
    fn descendant_holding_the_pipes_does_not_extend_the_bound() {
        let started = Instant::now();
        let out = run_command_with_timeout(
            sh("echo early; sleep 5; true"),
            None,
            Duration::from_millis(200),
            1000,
        )
        .expect("run");
        assert!(out.timed_out);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(out.stdout, b"early\n");
    }

    #[test]
    fn output_past_the_cap_is_counted_not_kept() {
        let out = run_command_with_timeout(
            sh("printf 'abcdefghij'"),
            None,
            Duration::from_secs(5),
            4,
        )
        .expect("run");
        assert_eq!(out.stdout, b"abcd");
        assert_eq!(out.stdout_truncated, 6);
        assert_eq!(out.stdout_truncated_notice(), "\n[stdout truncated 6 bytes]");
        assert_eq!(out.stderr_truncated_notice(), "");
    }

    #[test]
    fn stdin_reaches_the_child() {
        let out = run_command_with_timeout(
            Command::new("cat"),
            Some(b"ping".as_slice()),
            Duration::from_secs(5),
            100,
        )
        .expect("run");
        assert_eq!(out.stdout, b"ping");
    }

    #[test]
    fn missing_program_is_a_spawn_failure() {
        let cmd = Command::new("devagent-definitely-missing-binary");
        let err = run_command_with_timeout(cmd, None, Duration::from_secs(1), 100).unwrap_err();
        let spawn = err.downcast_ref::<SpawnFailed>().expect("spawn failure");
        assert_eq!(spawn.program, "devagent-definitely-missing-binary");
    }
}

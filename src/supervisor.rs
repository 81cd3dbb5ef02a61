//! Spawns and tears down the encoder subprocess, exposing its stdout as a
//! byte source and its stderr as a best-effort diagnostic line source.

use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::errors::AppError;

/// Produces the argv for the encoder process. Opaque to the supervisor and
/// the coordinator: neither cares how codec/bitrate/framerate/preset/tune
/// and the capture source descriptor become a command line.
pub trait CommandBuilder: Send + Sync {
    /// `argv[0]` is the executable; the remainder are its arguments.
    fn build(&self) -> Vec<String>;
}

pub struct EncoderHandle {
    pub pid: u32,
    pub started_at: Instant,
}

pub struct ProcessSupervisor {
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    stderr_lines: Option<mpsc::Receiver<String>>,
    handle: Option<EncoderHandle>,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self {
            child: None,
            stdout: None,
            stderr_lines: None,
            handle: None,
        }
    }
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> Option<&EncoderHandle> {
        self.handle.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    /// Spawn the child from `builder`'s argv. Stdout/stderr are piped;
    /// stdin is not wired up (the encoder reads from its own capture
    /// source, not from us).
    pub fn start(&mut self, builder: &dyn CommandBuilder) -> Result<(), AppError> {
        let argv = builder.build();
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| AppError::EncoderStartFailed("empty command line".into()))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(false);

        let mut child = command
            .spawn()
            .map_err(|error| AppError::EncoderStartFailed(format!("{program}: {error}")))?;

        let pid = child
            .id()
            .ok_or_else(|| AppError::EncoderStartFailed("child exited before pid was observed".into()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::EncoderStartFailed("stdout pipe unavailable".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::EncoderStartFailed("stderr pipe unavailable".into()))?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(drain_stderr_lines(stderr, tx));

        tracing::info!(pid, program, "encoder started");

        self.handle = Some(EncoderHandle {
            pid,
            started_at: Instant::now(),
        });
        self.stdout = Some(stdout);
        self.stderr_lines = Some(rx);
        self.child = Some(child);

        Ok(())
    }

    /// Read up to `max_bytes` from stdout. Empty return means EOF. May wait
    /// until some bytes are available; callers run this on a dedicated
    /// task so it never blocks the coordinator's event loop.
    pub async fn read_stdout(&mut self, max_bytes: usize) -> Result<Vec<u8>, std::io::Error> {
        let stdout = match self.stdout.as_mut() {
            Some(stdout) => stdout,
            None => return Ok(Vec::new()),
        };

        let mut buf = vec![0u8; max_bytes];
        let n = stdout.read(&mut buf).await?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Best-effort, non-blocking read of one buffered stderr line.
    pub fn read_stderr_line(&mut self) -> Option<String> {
        self.stderr_lines.as_mut()?.try_recv().ok()
    }

    /// Non-blocking exit-code poll.
    pub fn poll(&mut self) -> Option<i32> {
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => Some(status.code().unwrap_or(-1)),
            _ => None,
        }
    }

    /// Two-phase teardown: graceful terminate, then force-kill if the
    /// child outlives `grace`; a further 2s hard deadline bounds the final
    /// wait. Idempotent — returns `true` iff the child is confirmed exited
    /// (including "was already gone").
    pub async fn stop(&mut self, grace: Duration) -> bool {
        let mut child = match self.child.take() {
            Some(child) => child,
            None => return true,
        };
        self.stdout = None;
        self.stderr_lines = None;
        let handle = self.handle.take();

        if let Some(handle) = &handle {
            terminate_gracefully(handle.pid);
        }

        let exited = match timeout(grace, child.wait()).await {
            Ok(Ok(_)) => true,
            Ok(Err(_)) | Err(_) => {
                let _ = child.start_kill();
                matches!(timeout(Duration::from_secs(2), child.wait()).await, Ok(Ok(_)))
            }
        };

        exited
    }
}

/// Uses `try_send` rather than `send` so a consumer that falls behind (or
/// never calls `read_stderr_line`) can't backpressure this task into
/// blocking forever — which would eventually fill the OS pipe buffer and
/// stall the encoder's stdout writes too. Stderr is diagnostic-only, so
/// dropping the oldest unread line on a full channel is an acceptable loss.
async fn drain_stderr_lines(stderr: tokio::process::ChildStderr, tx: mpsc::Sender<String>) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if let Err(mpsc::error::TrySendError::Closed(_)) = tx.try_send(line) {
            break;
        }
    }
}

#[cfg(unix)]
fn terminate_gracefully(pid: u32) {
    // SAFETY: sending SIGTERM to a pid we hold via `Child` is well-defined;
    // a race where the pid has already been reused is possible in theory
    // but bounded by the hard-kill deadline below regardless.
    unsafe {
        libc::kill(pid as i32, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn terminate_gracefully(_pid: u32) {
    // No portable graceful-terminate signal outside unix; the force-kill
    // path after `grace` elapses is the only teardown available.
}

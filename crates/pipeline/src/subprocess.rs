//! Subprocess execution with bounded output capture and an optional deadline.
//!
//! [`run_command`] spawns a prepared [`Command`] in its own process group,
//! drains stdout and stderr concurrently into capped buffers, and waits
//! for the child. Output beyond the cap is read and discarded so the child
//! never blocks on a full pipe.
//!
//! The deadline covers the whole run: waiting for the child *and* waiting
//! for both pipes to close. A child that exits while something it started
//! still holds the pipes open is treated like one that overran, and the
//! whole process group is killed.

use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// How long to wait for the output readers after the process group is killed.
const READER_GRACE: Duration = Duration::from_secs(2);

/// Size of each read from a child pipe.
const READ_CHUNK_BYTES: usize = 8 * 1024;

/// How the child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exited on its own with this code.
    Exited(i32),
    /// Terminated by a signal (no exit code available).
    Signaled,
    /// Killed after exceeding the deadline.
    TimedOut,
}

/// Everything captured from one child process run.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub termination: Termination,
    pub duration_ms: u64,
}

#[derive(Debug, Default)]
struct CapturedStream {
    bytes: Vec<u8>,
    /// Set when bytes were discarded past the cap or the read failed.
    truncated: bool,
}

/// Buffer a reader task appends to; readable even if the task is aborted.
type SharedStream = Arc<Mutex<CapturedStream>>;

/// Spawn `cmd`, capture its output, and enforce `timeout` if given.
///
/// The caller sets program, arguments, and working directory. Stdin is
/// closed. Returns `Err` only if the process could not be spawned or
/// waited on; every way the process itself can end is a [`Termination`].
pub async fn run_command(
    cmd: &mut Command,
    timeout: Option<Duration>,
    max_output_bytes: usize,
) -> std::io::Result<ProcessOutput> {
    // `kill_on_drop(true)` makes sure the child dies with us on cancellation.
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .process_group(0);

    let start = Instant::now();
    let deadline = timeout.map(|limit| start + limit);
    let mut child = cmd.spawn()?;
    let pgid = child.id();

    let stdout = SharedStream::default();
    let stderr = SharedStream::default();
    let mut stdout_task = spawn_reader(child.stdout.take(), stdout.clone(), max_output_bytes);
    let mut stderr_task = spawn_reader(child.stderr.take(), stderr.clone(), max_output_bytes);

    let waited = match deadline {
        Some(at) => tokio::time::timeout_at(at, child.wait()).await.ok(),
        None => Some(child.wait().await),
    };

    let mut termination = match waited {
        Some(Ok(status)) => match status.code() {
            Some(code) => Termination::Exited(code),
            None => Termination::Signaled,
        },
        Some(Err(e)) => return Err(e),
        None => {
            kill_process_group(pgid);
            kill_leader(&mut child).await;
            Termination::TimedOut
        }
    };

    if termination != Termination::TimedOut {
        let pipes_closed = async {
            let _ = (&mut stdout_task).await;
            let _ = (&mut stderr_task).await;
        };
        let closed_in_time = match deadline {
            Some(at) => tokio::time::timeout_at(at, pipes_closed).await.is_ok(),
            None => {
                pipes_closed.await;
                true
            }
        };
        if !closed_in_time {
            tracing::warn!("Process exited but its output pipes outlived the deadline");
            kill_process_group(pgid);
            termination = Termination::TimedOut;
        }
    }

    if termination == Termination::TimedOut {
        finish_reader(&mut stdout_task, READER_GRACE).await;
        finish_reader(&mut stderr_task, READER_GRACE).await;
    }

    let (stdout, stdout_truncated) = take_text(&stdout);
    let (stderr, stderr_truncated) = take_text(&stderr);
    Ok(ProcessOutput {
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        termination,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

/// SIGKILL every process in the group led by the child.
fn kill_process_group(pgid: Option<u32>) {
    let Some(pgid) = pgid.and_then(|id| i32::try_from(id).ok()) else {
        return;
    };
    // Safety: kill(2) takes plain integers; a negative pid addresses the
    // process group created by `process_group(0)` at spawn.
    let ret = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if ret != 0 {
        tracing::debug!(
            pgid,
            error = %std::io::Error::last_os_error(),
            "Process group already gone",
        );
    }
}

/// Kill and reap the group leader.
async fn kill_leader(child: &mut Child) {
    if let Err(e) = child.kill().await {
        tracing::warn!(error = %e, "Failed to kill timed-out process");
    }
}

/// Give a reader `grace` to reach EOF, then abort it. Whatever it already
/// captured stays in its shared buffer.
async fn finish_reader(task: &mut JoinHandle<()>, grace: Duration) {
    if task.is_finished() {
        return;
    }
    if tokio::time::timeout(grace, &mut *task).await.is_err() {
        task.abort();
    }
}

fn spawn_reader<R>(handle: Option<R>, shared: SharedStream, cap: usize) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        if let Some(handle) = handle {
            read_capped(handle, &shared, cap).await;
        }
    })
}

/// Read a stream to EOF into `shared`, keeping at most `cap` bytes.
async fn read_capped<R: AsyncRead + Unpin>(mut handle: R, shared: &SharedStream, cap: usize) {
    let mut buf = vec![0u8; READ_CHUNK_BYTES];
    loop {
        let n = match handle.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read subprocess output");
                lock(shared).truncated = true;
                break;
            }
        };

        let mut captured = lock(shared);
        let keep = n.min(cap.saturating_sub(captured.bytes.len()));
        captured.bytes.extend_from_slice(&buf[..keep]);
        if keep < n {
            captured.truncated = true;
        }
    }
}

fn lock(shared: &SharedStream) -> MutexGuard<'_, CapturedStream> {
    shared
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn take_text(shared: &SharedStream) -> (String, bool) {
    let captured = std::mem::take(&mut *lock(shared));
    (
        String::from_utf8_lossy(&captured.bytes).into_owned(),
        captured.truncated,
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Slicing invoker: runs the external slicer against a job's working directory.
//!
//! The invocation always starts with the fixed prefix
//!
//! ```text
//! <slicer> -g <model> --load <profile> --output output.gcode
//! ```
//!
//! followed by one `--<key> <value>` pair per normalized parameter.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use slicefarm_core::{to_cli_args, ErrorKind, NormalizedParams, OUTPUT_FILE_NAME};
use tokio::process::Command;

use crate::fetch::StagedInputs;
use crate::subprocess::{self, Termination};

/// Default slicer executable, resolved on `PATH`.
pub const DEFAULT_SLICER_BIN: &str = "prusa-slicer";

/// Default cap on captured stdout / stderr per stream (10 MiB).
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Errors from locating or running the slicer.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("slicer executable '{0}' not found")]
    NotFound(String),

    #[error("slicer '{0}' is not executable")]
    NotExecutable(String),

    #[error("failed to run slicer: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("slicer exited with code {0}")]
    ExitCode(i32),

    #[error("slicer was terminated by a signal")]
    Signaled,

    #[error("slicer timed out after {0}s")]
    TimedOut(u64),
}

impl InvokeError {
    /// The outcome classification for this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TimedOut(_) => ErrorKind::SliceTimeoutError,
            _ => ErrorKind::SliceError,
        }
    }
}

/// What one slicer run produced. Immutable once returned.
#[derive(Debug)]
pub struct InvocationResult {
    /// Space-joined program and arguments, for diagnostics.
    pub command_line: String,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    /// `None` when the slicer exited with code 0.
    pub exit_error: Option<InvokeError>,
}

/// Runs the slicer binary with a deadline and an output cap.
#[derive(Debug, Clone)]
pub struct SlicerInvoker {
    program: PathBuf,
    timeout: Option<Duration>,
    max_output_bytes: usize,
}

impl SlicerInvoker {
    /// * `program`          - slicer executable (name on `PATH` or a path).
    /// * `timeout`          - per-invocation deadline; `None` waits forever.
    /// * `max_output_bytes` - cap on each captured stream.
    pub fn new(program: impl Into<PathBuf>, timeout: Option<Duration>, max_output_bytes: usize) -> Self {
        Self {
            program: program.into(),
            timeout,
            max_output_bytes,
        }
    }

    /// Arguments after the program name, in invocation order.
    pub fn build_args(&self, inputs: &StagedInputs, params: &NormalizedParams) -> Vec<String> {
        let mut args = vec![
            "-g".to_string(),
            inputs.model_file.clone(),
            "--load".to_string(),
            inputs.profile_file.clone(),
            "--output".to_string(),
            OUTPUT_FILE_NAME.to_string(),
        ];
        args.extend(to_cli_args(params));
        args
    }

    /// Run the slicer in `dir` and capture everything it produced.
    ///
    /// Never returns early: spawn failures, non-zero exits, signals and
    /// timeouts all come back as [`InvocationResult::exit_error`] alongside
    /// whatever output was captured.
    pub async fn invoke(
        &self,
        dir: &Path,
        inputs: &StagedInputs,
        params: &NormalizedParams,
    ) -> InvocationResult {
        let args = self.build_args(inputs, params);
        let command_line = std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");

        let mut cmd = Command::new(&self.program);
        cmd.args(&args).current_dir(dir);

        tracing::debug!(command = %command_line, "Invoking slicer");

        match subprocess::run_command(&mut cmd, self.timeout, self.max_output_bytes).await {
            Ok(output) => {
                let exit_error = match output.termination {
                    Termination::Exited(0) => None,
                    Termination::Exited(code) => Some(InvokeError::ExitCode(code)),
                    Termination::Signaled => Some(InvokeError::Signaled),
                    Termination::TimedOut => Some(InvokeError::TimedOut(
                        self.timeout.map(|t| t.as_secs()).unwrap_or_default(),
                    )),
                };
                InvocationResult {
                    command_line,
                    stdout: output.stdout,
                    stderr: output.stderr,
                    stdout_truncated: output.stdout_truncated,
                    stderr_truncated: output.stderr_truncated,
                    exit_error,
                }
            }
            Err(e) => InvocationResult {
                command_line,
                stdout: String::new(),
                stderr: String::new(),
                stdout_truncated: false,
                stderr_truncated: false,
                exit_error: Some(InvokeError::Spawn(e)),
            },
        }
    }
}

/// Resolve the slicer executable once at startup.
///
/// A bare name is searched for on `PATH`; anything containing a path
/// separator is checked as given. The result must be a regular file with
/// at least one execute bit set.
pub fn locate_executable(program: &str) -> Result<PathBuf, InvokeError> {
    if program.contains('/') {
        let path = PathBuf::from(program);
        return check_executable(&path).map(|()| path);
    }

    let search_path = std::env::var_os("PATH").unwrap_or_default();
    std::env::split_paths(&search_path)
        .map(|dir| dir.join(program))
        .find(|candidate| check_executable(candidate).is_ok())
        .ok_or_else(|| InvokeError::NotFound(program.to_string()))
}

fn check_executable(path: &Path) -> Result<(), InvokeError> {
    let display = || path.to_string_lossy().into_owned();
    let metadata = std::fs::metadata(path).map_err(|_| InvokeError::NotFound(display()))?;
    if !metadata.is_file() {
        return Err(InvokeError::NotFound(display()));
    }
    if metadata.permissions().mode() & 0o111 == 0 {
        return Err(InvokeError::NotExecutable(display()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::io::Write;

    use assert_matches::assert_matches;

    use super::*;

    fn inputs() -> StagedInputs {
        StagedInputs {
            model_file: "model.stl".into(),
            profile_file: "p.ini".into(),
        }
    }

    /// Write an executable shell script into `dir` and return its path.
    fn write_script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-slicer.sh");
        let mut f = std::fs::File::create(&path).expect("create script");
        writeln!(f, "#!/bin/sh").expect("write shebang");
        write!(f, "{body}").expect("write body");
        drop(f);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod script");
        path
    }

    #[test]
    fn fixed_prefix_without_params() {
        let invoker = SlicerInvoker::new("prusa-slicer", None, DEFAULT_MAX_OUTPUT_BYTES);
        let args = invoker.build_args(&inputs(), &NormalizedParams::new());
        assert_eq!(
            args,
            vec!["-g", "model.stl", "--load", "p.ini", "--output", "output.gcode"]
        );
    }

    #[test]
    fn params_follow_fixed_prefix() {
        let invoker = SlicerInvoker::new("prusa-slicer", None, DEFAULT_MAX_OUTPUT_BYTES);
        let mut params = NormalizedParams::new();
        params.insert("layer_height".into(), "0.2000".into());
        let args = invoker.build_args(&inputs(), &params);
        assert_eq!(&args[6..], ["--layer_height", "0.2000"]);
    }

    #[test]
    fn error_kinds() {
        assert_eq!(InvokeError::TimedOut(5).kind(), ErrorKind::SliceTimeoutError);
        assert_eq!(InvokeError::ExitCode(1).kind(), ErrorKind::SliceError);
        assert_eq!(InvokeError::Signaled.kind(), ErrorKind::SliceError);
    }

    #[tokio::test]
    async fn captures_output_and_command_line() {
        let bin = tempfile::tempdir().expect("bin dir");
        let work = tempfile::tempdir().expect("work dir");
        let script = write_script(bin.path(), "echo \"args: $*\"\necho warn >&2\n");

        let invoker = SlicerInvoker::new(&script, None, DEFAULT_MAX_OUTPUT_BYTES);
        let result = invoker
            .invoke(work.path(), &inputs(), &NormalizedParams::new())
            .await;

        assert!(result.exit_error.is_none());
        assert_eq!(
            result.stdout,
            "args: -g model.stl --load p.ini --output output.gcode\n"
        );
        assert_eq!(result.stderr, "warn\n");
        assert_eq!(
            result.command_line,
            format!(
                "{} -g model.stl --load p.ini --output output.gcode",
                script.display()
            )
        );
    }

    #[tokio::test]
    async fn nonzero_exit_keeps_output() {
        let bin = tempfile::tempdir().expect("bin dir");
        let work = tempfile::tempdir().expect("work dir");
        let script = write_script(bin.path(), "echo progress\necho 'bad profile' >&2\nexit 2\n");

        let invoker = SlicerInvoker::new(&script, None, DEFAULT_MAX_OUTPUT_BYTES);
        let result = invoker
            .invoke(work.path(), &inputs(), &NormalizedParams::new())
            .await;

        assert_matches!(result.exit_error, Some(InvokeError::ExitCode(2)));
        assert_eq!(result.stdout, "progress\n");
        assert_eq!(result.stderr, "bad profile\n");
    }

    #[tokio::test]
    async fn timeout_is_reported() {
        let bin = tempfile::tempdir().expect("bin dir");
        let work = tempfile::tempdir().expect("work dir");
        let script = write_script(bin.path(), "exec sleep 60\n");

        let invoker = SlicerInvoker::new(
            &script,
            Some(Duration::from_millis(200)),
            DEFAULT_MAX_OUTPUT_BYTES,
        );
        let result = invoker
            .invoke(work.path(), &inputs(), &NormalizedParams::new())
            .await;

        assert_matches!(result.exit_error, Some(InvokeError::TimedOut(_)));
    }

    #[tokio::test]
    async fn background_child_holding_output_counts_as_timeout() {
        let bin = tempfile::tempdir().expect("bin dir");
        let work = tempfile::tempdir().expect("work dir");
        let script = write_script(bin.path(), "echo exported\nsleep 30 &\nexit 0\n");

        let invoker = SlicerInvoker::new(&script, Some(Duration::from_secs(1)), 1024);
        let started = std::time::Instant::now();
        let result = invoker
            .invoke(work.path(), &inputs(), &NormalizedParams::new())
            .await;

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_matches!(result.exit_error, Some(ref e) if e.kind() == ErrorKind::SliceTimeoutError);
        assert_eq!(result.stdout, "exported\n");
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let work = tempfile::tempdir().expect("work dir");
        let invoker = SlicerInvoker::new("/nonexistent/prusa-slicer", None, 1024);
        let result = invoker
            .invoke(work.path(), &inputs(), &NormalizedParams::new())
            .await;
        assert_matches!(result.exit_error, Some(InvokeError::Spawn(_)));
        assert!(result.command_line.starts_with("/nonexistent/prusa-slicer -g"));
    }

    #[test]
    fn locate_rejects_missing_path() {
        assert_matches!(
            locate_executable("/nonexistent/prusa-slicer"),
            Err(InvokeError::NotFound(_))
        );
    }

    #[test]
    fn locate_rejects_non_executable_file() {
        let f = tempfile::NamedTempFile::new().expect("create temp file");
        let path = f.path().to_str().expect("path");
        assert_matches!(locate_executable(path), Err(InvokeError::NotExecutable(_)));
    }

    #[test]
    fn locate_accepts_explicit_executable() {
        let bin = tempfile::tempdir().expect("bin dir");
        let script = write_script(bin.path(), "exit 0\n");
        let found = locate_executable(script.to_str().expect("path")).expect("found");
        assert_eq!(found, script);
    }

    #[test]
    fn locate_finds_shell_on_path() {
        assert!(locate_executable("sh").is_ok());
    }

    #[test]
    fn locate_unknown_name_on_path() {
        assert_matches!(
            locate_executable("definitely-not-a-real-slicer-binary"),
            Err(InvokeError::NotFound(_))
        );
    }
}

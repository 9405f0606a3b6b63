//! Job outcome and its completion-queue wire form.

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, JobError};

/// The result of running one job through the pipeline.
///
/// Produced exactly once per successfully parsed job, whether the job
/// succeeded or failed. Diagnostic fields hold whatever was captured
/// before the terminal step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobOutcome {
    pub job_id: String,
    /// URL of the uploaded artifact; set only on success.
    pub artifact_url: Option<String>,
    pub error: Option<JobError>,
    /// Milliseconds from pipeline entry to the terminal step.
    pub elapsed_ms: u64,
    pub stdout: String,
    pub stderr: String,
    /// Space-joined slicer invocation, empty if slicing never ran.
    pub command_line: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
}

impl JobOutcome {
    /// An outcome for `job_id` with every other field at its default.
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// Build the message published on the completion queue.
    pub fn to_message(&self) -> CompletionMessage {
        CompletionMessage {
            job_id: self.job_id.clone(),
            file: self.artifact_url.clone().unwrap_or_default(),
            error: self.error_kind(),
            error_detail: self.error.as_ref().map(|e| e.message.clone()),
            run_time: self.elapsed_ms,
            std_out: self.stdout.clone(),
            std_err: self.stderr.clone(),
            command_info: self.command_line.clone(),
            std_out_truncated: self.stdout_truncated,
            std_err_truncated: self.stderr_truncated,
        }
    }
}

/// Completion-queue payload.
///
/// ```json
/// {"jobId":"j1","file":"http://...","error":null,"runTime":1234,
///  "stdOut":"...","stdErr":"...","commandInfo":"prusa-slicer -g ..."}
/// ```
///
/// `errorDetail` and the truncation flags are only emitted when set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionMessage {
    #[serde(rename = "jobId")]
    pub job_id: String,
    /// Artifact URL, or an empty string when the job failed.
    pub file: String,
    pub error: Option<ErrorKind>,
    #[serde(
        rename = "errorDetail",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub error_detail: Option<String>,
    #[serde(rename = "runTime")]
    pub run_time: u64,
    #[serde(rename = "stdOut")]
    pub std_out: String,
    #[serde(rename = "stdErr")]
    pub std_err: String,
    #[serde(rename = "commandInfo")]
    pub command_info: String,
    #[serde(rename = "stdOutTruncated", default, skip_serializing_if = "is_false")]
    pub std_out_truncated: bool,
    #[serde(rename = "stdErrTruncated", default, skip_serializing_if = "is_false")]
    pub std_err_truncated: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

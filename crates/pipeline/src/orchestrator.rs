//! Job pipeline orchestrator.
//!
//! Runs one job through Stage → Fetch → Slice → Upload and folds the
//! result of every step into a single [`JobOutcome`]. The pipeline is
//! strictly linear with no retries; the first failing step is terminal.
//!
//! The working directory is a [`tempfile::TempDir`] owned by the running
//! job. It is removed when the guard drops, which covers every return,
//! a panic, and cancellation of the job future.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use slicefarm_core::{
    artifact_key, normalize_params, parse_job_request, ErrorKind, JobError, JobOutcome,
    JobParseError, JobRequest, OUTPUT_FILE_NAME,
};
use tempfile::TempDir;

use crate::fetch::AssetFetcher;
use crate::invoke::SlicerInvoker;
use crate::storage::ArtifactStore;

/// Prefix of every per-job working directory.
const WORK_DIR_PREFIX: &str = "job";

/// Sequences the pipeline stages for one job at a time.
pub struct JobPipeline {
    fetcher: AssetFetcher,
    invoker: SlicerInvoker,
    store: Arc<dyn ArtifactStore>,
    /// Parent of per-job working directories; the OS temp dir if `None`.
    work_root: Option<PathBuf>,
}

impl JobPipeline {
    pub fn new(
        fetcher: AssetFetcher,
        invoker: SlicerInvoker,
        store: Arc<dyn ArtifactStore>,
        work_root: Option<PathBuf>,
    ) -> Self {
        Self {
            fetcher,
            invoker,
            store,
            work_root,
        }
    }

    /// Parse a raw payload and run it.
    ///
    /// Returns the parse error when the payload is not a job; no outcome
    /// can be produced without a job id. The elapsed time of the outcome is
    /// measured from entry into this function.
    pub async fn process(&self, body: &[u8]) -> Result<JobOutcome, JobParseError> {
        let start = Instant::now();
        let request = parse_job_request(body)?;
        Ok(self.run_from(&request, start).await)
    }

    async fn run_from(&self, request: &JobRequest, start: Instant) -> JobOutcome {
        let job_id = request.job_id.as_str();
        tracing::info!(job_id, "Starting job");

        let mut outcome = JobOutcome::new(job_id);
        if let Err(error) = self.execute(request, &mut outcome).await {
            outcome.error = Some(error);
        }
        outcome.elapsed_ms = start.elapsed().as_millis() as u64;
        outcome
    }

    /// Run every stage, recording diagnostics into `outcome` as they become
    /// available. The working directory lives exactly as long as this call.
    async fn execute(&self, request: &JobRequest, outcome: &mut JobOutcome) -> Result<(), JobError> {
        let job_id = request.job_id.as_str();

        // --- Stage ---
        let work_dir = self
            .create_work_dir()
            .map_err(|e| JobError::new(ErrorKind::StagingError, e.to_string()))?;
        tracing::debug!(job_id, dir = %work_dir.path().display(), "Working directory created");

        // --- Fetch ---
        let inputs = self
            .fetcher
            .fetch_inputs(
                work_dir.path(),
                &request.model_file_url,
                &request.profile_file_url,
            )
            .await
            .map_err(|e| JobError::new(ErrorKind::DownloadError, e.to_string()))?;
        tracing::info!(job_id, "Download completed");

        // --- Slice ---
        let params = normalize_params(&request.params);
        let invocation = self.invoker.invoke(work_dir.path(), &inputs, &params).await;
        outcome.command_line = invocation.command_line;
        outcome.stdout = invocation.stdout;
        outcome.stderr = invocation.stderr;
        outcome.stdout_truncated = invocation.stdout_truncated;
        outcome.stderr_truncated = invocation.stderr_truncated;
        if let Some(e) = invocation.exit_error {
            return Err(JobError::new(e.kind(), e.to_string()));
        }
        tracing::info!(job_id, "Render completed");

        // --- Upload ---
        let artifact = work_dir.path().join(OUTPUT_FILE_NAME);
        if !tokio::fs::try_exists(&artifact).await.unwrap_or(false) {
            return Err(JobError::new(
                ErrorKind::UploadError,
                format!("slicer did not produce {OUTPUT_FILE_NAME}"),
            ));
        }
        let url = self
            .store
            .put_file(&artifact_key(job_id), &artifact)
            .await
            .map_err(|e| JobError::new(ErrorKind::UploadError, e.to_string()))?;

        outcome.artifact_url = Some(url);
        Ok(())
    }

    fn create_work_dir(&self) -> std::io::Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(WORK_DIR_PREFIX);
        match &self.work_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
    }
}

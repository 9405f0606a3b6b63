//! `slicefarm-worker` library crate.
//!
//! Configuration, the broker transport, and the wiring that assembles a
//! [`JobHandler`] from them. The binary entrypoint lives in `main.rs`.

pub mod amqp;
pub mod config;

use std::sync::Arc;

use slicefarm_pipeline::{
    locate_executable, ArtifactStore, AssetFetcher, CompletionSink, JobHandler, JobPipeline,
    ResultPublisher, SlicerInvoker,
};

use crate::config::WorkerConfig;

/// Errors that stop the worker from starting.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("slicer unavailable: {0}")]
    Slicer(#[from] slicefarm_pipeline::InvokeError),

    #[error("cannot build HTTP client: {0}")]
    Fetcher(#[from] slicefarm_pipeline::FetchError),
}

/// Assemble the per-message handler from configuration and the outbound
/// channels.
///
/// Resolves the slicer binary up front so a missing or non-executable
/// slicer fails startup instead of every job.
pub fn build_handler(
    config: &WorkerConfig,
    store: Arc<dyn ArtifactStore>,
    completions: Arc<dyn CompletionSink>,
    dead_letter: Option<Arc<dyn CompletionSink>>,
) -> Result<JobHandler, StartupError> {
    let slicer = locate_executable(&config.slicer.program)?;
    tracing::info!(slicer = %slicer.display(), "Slicer located");

    let fetcher = AssetFetcher::new(config.fetch_timeout)?;
    let invoker = SlicerInvoker::new(
        slicer,
        config.slicer.timeout,
        config.slicer.max_output_bytes,
    );
    let pipeline = JobPipeline::new(fetcher, invoker, store, config.work_dir.clone());

    Ok(JobHandler::new(
        pipeline,
        ResultPublisher::new(completions),
        dead_letter,
    ))
}

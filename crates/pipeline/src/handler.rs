//! Per-message handling between the transport and the pipeline.
//!
//! [`JobHandler::handle`] is what a dispatch loop calls for every
//! delivery: it runs the pipeline, publishes the outcome (or forwards an
//! unparseable payload to the dead-letter sink), and logs exactly one
//! terminal event with a stable `error_kind` tag. It never fails; the
//! caller acknowledges the message once it returns.

use std::sync::Arc;

use slicefarm_core::{ErrorKind, JobOutcome};

use crate::orchestrator::JobPipeline;
use crate::publish::{CompletionSink, ResultPublisher};

/// Bytes of an unparseable payload included in its log event.
const MAX_LOGGED_PAYLOAD_BYTES: usize = 1024;

/// How a delivery was disposed of.
#[derive(Debug)]
pub enum Disposition {
    /// The payload was a job; its outcome was handed to the publisher.
    Completed(JobOutcome),
    /// The payload was not a job; no outcome exists.
    Unparseable,
}

/// Glues the pipeline to the completion and dead-letter channels.
pub struct JobHandler {
    pipeline: JobPipeline,
    publisher: ResultPublisher,
    dead_letter: Option<Arc<dyn CompletionSink>>,
}

impl std::fmt::Debug for JobHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandler").finish_non_exhaustive()
    }
}

impl JobHandler {
    pub fn new(
        pipeline: JobPipeline,
        publisher: ResultPublisher,
        dead_letter: Option<Arc<dyn CompletionSink>>,
    ) -> Self {
        Self {
            pipeline,
            publisher,
            dead_letter,
        }
    }

    /// Process one raw message body to completion.
    pub async fn handle(&self, body: &[u8]) -> Disposition {
        match self.pipeline.process(body).await {
            Ok(outcome) => {
                log_outcome(&outcome);
                self.publisher.publish(&outcome).await;
                Disposition::Completed(outcome)
            }
            Err(e) => {
                tracing::error!(
                    error_kind = ErrorKind::ParseError.as_str(),
                    error = %e,
                    payload = %payload_preview(body),
                    payload_bytes = body.len(),
                    "Discarding unparseable job payload",
                );
                self.dead_letter(body).await;
                Disposition::Unparseable
            }
        }
    }

    async fn dead_letter(&self, body: &[u8]) {
        let Some(sink) = &self.dead_letter else {
            return;
        };
        if let Err(e) = sink.send(body.to_vec()).await {
            tracing::error!(
                error_kind = ErrorKind::PublishError.as_str(),
                error = %e,
                "Could not forward payload to dead-letter queue",
            );
        }
    }
}

fn log_outcome(outcome: &JobOutcome) {
    match &outcome.error {
        None => tracing::info!(
            job_id = %outcome.job_id,
            elapsed_ms = outcome.elapsed_ms,
            url = outcome.artifact_url.as_deref().unwrap_or_default(),
            "Job finished",
        ),
        Some(error) => tracing::warn!(
            job_id = %outcome.job_id,
            elapsed_ms = outcome.elapsed_ms,
            error_kind = error.kind.as_str(),
            error = %error.message,
            "Job failed",
        ),
    }
}

/// The start of `body` as lossy UTF-8, at most [`MAX_LOGGED_PAYLOAD_BYTES`].
fn payload_preview(body: &[u8]) -> String {
    if body.len() <= MAX_LOGGED_PAYLOAD_BYTES {
        return String::from_utf8_lossy(body).into_owned();
    }
    format!(
        "{}... ({} bytes total)",
        String::from_utf8_lossy(&body[..MAX_LOGGED_PAYLOAD_BYTES]),
        body.len()
    )
}

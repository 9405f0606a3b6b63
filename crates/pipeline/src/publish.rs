//! Result publisher.
//!
//! Serializes a [`JobOutcome`] into its completion-queue form and hands it
//! to a [`CompletionSink`]. Publishing is best-effort: failures are logged
//! with `error_kind = PublishError` and never retried or surfaced to the
//! acknowledgment decision.

use std::sync::Arc;

use async_trait::async_trait;
use slicefarm_core::{ErrorKind, JobOutcome};

/// Errors from delivering a completion message.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("failed to serialize completion message: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("completion channel rejected message: {0}")]
    Transport(String),
}

/// Outbound channel for serialized messages (completion queue, dead-letter queue).
#[async_trait]
pub trait CompletionSink: Send + Sync {
    /// Deliver one JSON message body.
    async fn send(&self, body: Vec<u8>) -> Result<(), PublishError>;
}

/// Publishes job outcomes to the completion channel.
#[derive(Clone)]
pub struct ResultPublisher {
    sink: Arc<dyn CompletionSink>,
}

impl ResultPublisher {
    pub fn new(sink: Arc<dyn CompletionSink>) -> Self {
        Self { sink }
    }

    /// Serialize and deliver `outcome`, returning any failure.
    pub async fn try_publish(&self, outcome: &JobOutcome) -> Result<(), PublishError> {
        let body = serde_json::to_vec(&outcome.to_message())?;
        self.sink.send(body).await
    }

    /// Serialize and deliver `outcome`; failures are logged and swallowed.
    pub async fn publish(&self, outcome: &JobOutcome) {
        if let Err(e) = self.try_publish(outcome).await {
            tracing::error!(
                job_id = %outcome.job_id,
                error_kind = ErrorKind::PublishError.as_str(),
                error = %e,
                "Could not publish job outcome",
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! The slicing job pipeline.
//!
//! Fetches a job's inputs, runs the external slicer against them in an
//! isolated working directory, uploads the produced G-code, and publishes
//! a structured outcome. Transport (the message broker) lives in the
//! worker binary; this crate only sees raw payloads and the
//! [`ArtifactStore`](storage::ArtifactStore) /
//! [`CompletionSink`](publish::CompletionSink) seams.

pub mod fetch;
pub mod handler;
pub mod invoke;
pub mod orchestrator;
pub mod publish;
pub mod storage;
pub mod subprocess;

pub use fetch::{AssetFetcher, FetchError, StagedInputs};
pub use handler::{Disposition, JobHandler};
pub use invoke::{locate_executable, InvocationResult, InvokeError, SlicerInvoker};
pub use orchestrator::JobPipeline;
pub use publish::{CompletionSink, PublishError, ResultPublisher};
pub use storage::{ArtifactStore, S3ArtifactStore, S3Settings, StorageError};

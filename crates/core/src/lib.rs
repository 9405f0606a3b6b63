//! Pure domain types for the slicing worker.
//!
//! Nothing in this crate touches the network, the filesystem, or a
//! subprocess. It defines the inbound job payload, the parameter
//! normalizer that turns untyped params into CLI flags, the error
//! taxonomy, and the outcome that is published when a job finishes.

pub mod error;
pub mod job;
pub mod outcome;
pub mod params;

pub use error::{ErrorKind, JobError};
pub use job::{parse_job_request, JobParseError, JobRequest};
pub use outcome::{CompletionMessage, JobOutcome};
pub use params::{normalize_params, to_cli_args, NormalizedParams};

/// File name the slicer writes its G-code to inside the working directory.
pub const OUTPUT_FILE_NAME: &str = "output.gcode";

/// Object-storage key under which a job's artifact is stored.
pub fn artifact_key(job_id: &str) -> String {
    format!("{job_id}/{OUTPUT_FILE_NAME}")
}

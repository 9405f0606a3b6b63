//! Error taxonomy shared by every pipeline stage.
//!
//! [`ErrorKind`] values are stable tags: they appear verbatim in the
//! `error` field of completion messages and in the `error_kind` field of
//! log events, so operators can filter on them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable classification of a job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Inbound payload could not be decoded into a job request.
    ParseError,
    /// The per-job working directory could not be created.
    StagingError,
    /// Fetching an input file or writing it locally failed.
    DownloadError,
    /// The slicer failed to start, exited non-zero, or was killed.
    SliceError,
    /// The slicer exceeded its deadline and was killed.
    SliceTimeoutError,
    /// Uploading the produced artifact failed.
    UploadError,
    /// The completion message could not be delivered.
    PublishError,
}

impl ErrorKind {
    /// The tag as it appears on the wire and in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ParseError => "ParseError",
            Self::StagingError => "StagingError",
            Self::DownloadError => "DownloadError",
            Self::SliceError => "SliceError",
            Self::SliceTimeoutError => "SliceTimeoutError",
            Self::UploadError => "UploadError",
            Self::PublishError => "PublishError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure carried inside a [`JobOutcome`](crate::JobOutcome).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct JobError {
    pub kind: ErrorKind,
    /// Human-readable detail, usually the display form of the source error.
    pub message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

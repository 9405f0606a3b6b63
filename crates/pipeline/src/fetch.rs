//! Asset fetcher: downloads a job's model and profile into its working directory.
//!
//! Each file is stored under the last path segment of the URL the server
//! finally answered from, so redirects to a differently named object are
//! honoured. Downloads are sequential; the profile is not fetched when
//! the model fails.

use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;

/// Errors from the asset fetch stage.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// No URL was supplied for one of the inputs.
    #[error("no URL given for {0}")]
    MissingUrl(&'static str),

    /// The HTTP request itself failed (invalid URL, network, DNS, TLS, body read).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-2xx status code.
    #[error("download of {url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    /// The resolved URL has no usable final path segment.
    #[error("cannot derive a file name from {0}")]
    NoFileName(String),

    /// Model and profile resolved to the same local file name.
    #[error("model and profile both resolve to '{0}'")]
    NameCollision(String),

    /// Writing the downloaded bytes to the working directory failed.
    #[error("I/O error writing {file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },
}

/// Local file names of the staged inputs, relative to the working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedInputs {
    pub model_file: String,
    pub profile_file: String,
}

/// HTTP downloader for job inputs.
#[derive(Clone)]
pub struct AssetFetcher {
    client: reqwest::Client,
}

impl AssetFetcher {
    /// Create a fetcher whose requests time out after `timeout`
    /// (`None` = no client-side timeout).
    pub fn new(timeout: Option<Duration>) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder();
        if let Some(limit) = timeout {
            builder = builder.timeout(limit);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    /// Download the model, then the profile, into `dir`.
    pub async fn fetch_inputs(
        &self,
        dir: &Path,
        model_url: &str,
        profile_url: &str,
    ) -> Result<StagedInputs, FetchError> {
        if model_url.trim().is_empty() {
            return Err(FetchError::MissingUrl("model file"));
        }
        if profile_url.trim().is_empty() {
            return Err(FetchError::MissingUrl("profile file"));
        }

        let model_file = self.fetch_one(dir, model_url, None).await?;
        let profile_file = self.fetch_one(dir, profile_url, Some(&model_file)).await?;

        Ok(StagedInputs {
            model_file,
            profile_file,
        })
    }

    /// Download a single URL into `dir` and return the local file name.
    ///
    /// `taken` is a file name already used in `dir`; resolving to it is an
    /// error rather than a silent overwrite.
    async fn fetch_one(
        &self,
        dir: &Path,
        url: &str,
        taken: Option<&str>,
    ) -> Result<String, FetchError> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                url: response.url().to_string(),
                status: status.as_u16(),
            });
        }

        let file_name = file_name_from_url(response.url())
            .ok_or_else(|| FetchError::NoFileName(response.url().to_string()))?;
        if taken == Some(file_name.as_str()) {
            return Err(FetchError::NameCollision(file_name));
        }

        let io_err = |source| FetchError::Io {
            file: file_name.clone(),
            source,
        };

        let mut file = tokio::fs::File::create(dir.join(&file_name))
            .await
            .map_err(io_err)?;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            file.write_all(&chunk?).await.map_err(io_err)?;
        }
        file.flush().await.map_err(io_err)?;

        tracing::debug!(url, file = %file_name, "Downloaded input file");
        Ok(file_name)
    }
}

/// Final path segment of `url`, still percent-encoded; the query is ignored.
///
/// Returns `None` for empty, `.` or `..` segments, which cannot name a
/// file inside the working directory.
pub fn file_name_from_url(url: &reqwest::Url) -> Option<String> {
    let segment = url.path_segments()?.next_back()?;
    match segment {
        "" | "." | ".." => None,
        name if name.contains('\\') => None,
        name => Some(name.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

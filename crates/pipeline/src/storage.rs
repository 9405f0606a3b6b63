//! Artifact storage.
//!
//! [`ArtifactStore`] is the seam the orchestrator uploads through;
//! [`S3ArtifactStore`] implements it against any S3-compatible endpoint
//! (AWS, MinIO, ...) using path-style addressing.

use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;

/// Errors from the artifact upload stage.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The local artifact could not be opened for upload.
    #[error("cannot read artifact {path}: {message}")]
    Read { path: String, message: String },

    /// The object store rejected or failed the upload.
    #[error("upload of {key} failed: {message}")]
    Upload { key: String, message: String },

    /// The bucket could not be reached at startup.
    #[error("bucket {bucket} is not reachable: {message}")]
    Unreachable { bucket: String, message: String },
}

/// Destination for finished artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Upload the file at `path` under `key`, overwriting any existing
    /// object, and return the URL the artifact can be fetched from.
    async fn put_file(&self, key: &str, path: &Path) -> Result<String, StorageError>;
}

/// Connection settings for an S3-compatible endpoint.
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub region: String,
    pub bucket: String,
    /// Endpoint URL; a bare `host:port` gets a scheme from `disable_ssl`.
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Use `http://` instead of `https://` when `endpoint` has no scheme.
    pub disable_ssl: bool,
}

impl S3Settings {
    /// The endpoint with an explicit scheme and no trailing slash.
    pub fn endpoint_url(&self) -> String {
        let endpoint = self.endpoint.trim_end_matches('/');
        if endpoint.contains("://") {
            endpoint.to_string()
        } else if self.disable_ssl {
            format!("http://{endpoint}")
        } else {
            format!("https://{endpoint}")
        }
    }
}

/// [`ArtifactStore`] backed by an S3 bucket.
pub struct S3ArtifactStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    endpoint: String,
}

impl S3ArtifactStore {
    /// Build an S3 client with static credentials and path-style addressing.
    pub async fn connect(settings: &S3Settings) -> Self {
        let endpoint = settings.endpoint_url();
        let credentials = aws_credential_types::Credentials::new(
            settings.access_key_id.clone(),
            settings.secret_access_key.clone(),
            None,
            None,
            "slicefarm-static",
        );

        let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(settings.region.clone()))
            .credentials_provider(credentials)
            .endpoint_url(&endpoint)
            .load()
            .await;

        let config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(true)
            .build();

        tracing::info!(
            endpoint = %endpoint,
            bucket = %settings.bucket,
            region = %settings.region,
            "S3 artifact store configured",
        );

        Self {
            client: aws_sdk_s3::Client::from_conf(config),
            bucket: settings.bucket.clone(),
            endpoint,
        }
    }

    /// Path-style URL of `key` in this store's bucket.
    pub fn object_url(&self, key: &str) -> String {
        object_url(&self.endpoint, &self.bucket, key)
    }

    /// Verify the bucket exists and the credentials can reach it.
    pub async fn check_bucket(&self) -> Result<(), StorageError> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::Unreachable {
                bucket: self.bucket.clone(),
                message: DisplayErrorContext(&e).to_string(),
            })?;
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    async fn put_file(&self, key: &str, path: &Path) -> Result<String, StorageError> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::Read {
                path: path.to_string_lossy().into_owned(),
                message: e.to_string(),
            })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::Upload {
                key: key.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        Ok(self.object_url(key))
    }
}

fn object_url(endpoint: &str, bucket: &str, key: &str) -> String {
    format!("{endpoint}/{bucket}/{key}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Inbound job payload and its parser.
//!
//! A job arrives as a JSON object of the shape
//! `{"jobId": "...", "file": "<model url>", "profileFile": "<profile url>", "params": {...}}`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A request to slice one model with one profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    #[serde(rename = "jobId")]
    pub job_id: String,

    /// URL of the 3D model (STL, 3MF, OBJ, ...).
    #[serde(rename = "file", default)]
    pub model_file_url: String,

    /// URL of the slicer profile (`.ini`).
    #[serde(rename = "profileFile", default)]
    pub profile_file_url: String,

    /// Untyped slicer parameters. Missing or `null` means no parameters.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub params: Map<String, Value>,
}

/// Why an inbound payload could not become a [`JobRequest`].
#[derive(Debug, thiserror::Error)]
pub enum JobParseError {
    #[error("invalid job payload: {0}")]
    Json(#[from] serde_json::Error),

    /// Without a job id no outcome can be addressed, so this is a parse failure.
    #[error("job payload has an empty jobId")]
    MissingJobId,
}

/// Decode a raw message body into a [`JobRequest`].
///
/// Model and profile URLs are allowed to be missing; the fetch stage
/// reports them as download failures against the known job id.
pub fn parse_job_request(body: &[u8]) -> Result<JobRequest, JobParseError> {
    let request: JobRequest = serde_json::from_slice(body)?;
    if request.job_id.trim().is_empty() {
        return Err(JobParseError::MissingJobId);
    }
    Ok(request)
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_full_payload() {
        let body = br#"{
            "jobId": "j1",
            "file": "http://host/model.stl",
            "profileFile": "http://host/p.ini",
            "params": {"layer_height": 0.2, "fill_density": 20}
        }"#;
        let job = parse_job_request(body).unwrap();
        assert_eq!(job.job_id, "j1");
        assert_eq!(job.model_file_url, "http://host/model.stl");
        assert_eq!(job.profile_file_url, "http://host/p.ini");
        assert_eq!(job.params.len(), 2);
    }

    #[test]
    fn parse_without_params() {
        let body = br#"{"jobId":"j2","file":"http://h/a.stl","profileFile":"http://h/p.ini"}"#;
        let job = parse_job_request(body).unwrap();
        assert!(job.params.is_empty());
    }

    #[test]
    fn parse_null_params() {
        let body = br#"{"jobId":"j3","file":"","profileFile":"","params":null}"#;
        let job = parse_job_request(body).unwrap();
        assert!(job.params.is_empty());
    }

    #[test]
    fn missing_urls_default_to_empty() {
        let job = parse_job_request(br#"{"jobId":"j4"}"#).unwrap();
        assert_eq!(job.model_file_url, "");
        assert_eq!(job.profile_file_url, "");
    }

    #[test]
    fn invalid_json_is_rejected() {
        assert_matches!(
            parse_job_request(b"not json at all"),
            Err(JobParseError::Json(_))
        );
    }

    #[test]
    fn params_must_be_an_object() {
        let body = br#"{"jobId":"j5","params":[1,2,3]}"#;
        assert_matches!(parse_job_request(body), Err(JobParseError::Json(_)));
    }

    #[test]
    fn missing_job_id_is_rejected() {
        assert_matches!(
            parse_job_request(br#"{"file":"http://h/a.stl"}"#),
            Err(JobParseError::Json(_))
        );
    }

    #[test]
    fn blank_job_id_is_rejected() {
        assert_matches!(
            parse_job_request(br#"{"jobId":"  "}"#),
            Err(JobParseError::MissingJobId)
        );
    }
}

//! Job submission and status polling.
//!
//! A job moves `PENDING`/`RUNNING` until the service reports `SUCCESS` or
//! `FAILED`. Any other status string is treated as still in progress.
use std::fmt;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::config::PollPolicy;
use crate::error::{AppError, AppResult};
use crate::workflow::binder::BoundField;
use crate::workflow::client::{failure_parts, ApiClient};
use crate::workflow::template::string_or_number;

/// Tracing hint sent with every submission: md5 of the current unix second.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn generate() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self::from_unix_secs(secs)
    }

    pub fn from_unix_secs(secs: u64) -> Self {
        RequestId(format!("{:x}", md5::compute(secs.to_string())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobParams {
    #[serde(rename = "async")]
    is_async: bool,
    priority: &'static str,
    extra_params: Map<String, Value>,
}

impl Default for JobParams {
    fn default() -> Self {
        JobParams {
            is_async: false,
            priority: "NORMAL",
            extra_params: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct FieldAttrs {
    field_attrs: Vec<BoundField>,
}

/// Body of `POST /v1/jobs/workflow/template`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    #[serde(rename = "request_id")]
    request_id: RequestId,
    template_id: String,
    params: JobParams,
    fields: FieldAttrs,
}

impl JobRequest {
    pub fn new(template_id: impl Into<String>, fields: Vec<BoundField>) -> Self {
        Self::with_request_id(RequestId::generate(), template_id, fields)
    }

    pub fn with_request_id(request_id: RequestId, template_id: impl Into<String>, fields: Vec<BoundField>) -> Self {
        JobRequest {
            request_id,
            template_id: template_id.into(),
            params: JobParams::default(),
            fields: FieldAttrs { field_attrs: fields },
        }
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn template_id(&self) -> &str {
        &self.template_id
    }

    pub fn fields(&self) -> &[BoundField] {
        &self.fields.field_attrs
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failed,
    Other(String),
}

impl JobStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "PENDING" => JobStatus::Pending,
            "RUNNING" => JobStatus::Running,
            "SUCCESS" => JobStatus::Success,
            "FAILED" => JobStatus::Failed,
            other => JobStatus::Other(other.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => f.write_str("PENDING"),
            JobStatus::Running => f.write_str("RUNNING"),
            JobStatus::Success => f.write_str("SUCCESS"),
            JobStatus::Failed => f.write_str("FAILED"),
            JobStatus::Other(s) => f.write_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for JobStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(JobStatus::parse(&raw))
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    job: Option<SubmittedJob>,
}

#[derive(Debug, Deserialize)]
struct SubmittedJob {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    status: Option<JobStatus>,
}

#[derive(Debug, Deserialize)]
struct PollResponse {
    job: Option<JobSnapshot>,
}

/// One status read of a job.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub status: JobStatus,
    #[serde(default)]
    success_info: Option<SuccessInfo>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct SuccessInfo {
    #[serde(default)]
    images: Vec<ImageRef>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct ImageRef {
    url: String,
}

impl JobSnapshot {
    pub fn image_urls(&self) -> Vec<&str> {
        self.success_info
            .iter()
            .flat_map(|s| s.images.iter().map(|i| i.url.as_str()))
            .collect()
    }
}

impl ApiClient {
    /// Submit a bound job and return the service's job id.
    pub async fn submit_job(&self, request: &JobRequest) -> AppResult<String> {
        tracing::info!(
            request_id = %request.request_id,
            template_id = %request.template_id,
            fields = request.fields.field_attrs.len(),
            "Submitting template job"
        );
        let response = self
            .post("/v1/jobs/workflow/template")
            .json(request)
            .send()
            .await
            .map_err(|e| AppError::SubmissionFailed {
                status: None,
                message: e.to_string(),
            })?;
        let status = response.status().as_u16();
        if !response.status().is_success() {
            let (status, body) = failure_parts(response).await;
            tracing::error!(status, "Failed to create workflow job: {}", body);
            return Err(AppError::SubmissionFailed {
                status: Some(status),
                message: body,
            });
        }
        let body = response.text().await.map_err(|e| AppError::SubmissionFailed {
            status: Some(status),
            message: e.to_string(),
        })?;
        let parsed: SubmitResponse = serde_json::from_str(&body).map_err(|e| AppError::SubmissionFailed {
            status: Some(status),
            message: format!("malformed response ({}): {}", e, body),
        })?;
        let job = parsed.job.ok_or_else(|| {
            tracing::error!("Failed to create workflow job: {}", body);
            AppError::SubmissionFailed {
                status: Some(status),
                message: format!("response has no job object: {}", body),
            }
        })?;
        tracing::info!(
            job_id = %job.id,
            status = %job.status.as_ref().map(ToString::to_string).unwrap_or_default(),
            "Workflow job created"
        );
        Ok(job.id)
    }

    /// Read a job's status once. `Ok(None)` means the service answered but
    /// did not include a job object.
    pub async fn job_status(&self, job_id: &str) -> AppResult<Option<JobSnapshot>> {
        let poll_failed = |status: Option<u16>, message: String| AppError::PollFailed {
            job_id: job_id.to_string(),
            status,
            message,
        };
        let response = self
            .get(&format!("/v1/jobs/{}", job_id))
            .send()
            .await
            .map_err(|e| poll_failed(None, e.to_string()))?;
        if !response.status().is_success() {
            let (status, body) = failure_parts(response).await;
            return Err(poll_failed(Some(status), body));
        }
        let body = response.text().await.map_err(|e| poll_failed(None, e.to_string()))?;
        let parsed: PollResponse = serde_json::from_str(&body).map_err(|e| AppError::decode("job status", e))?;
        Ok(parsed.job)
    }

    /// Poll until the job is terminal and return the first result image URL.
    ///
    /// Sleeps `policy.interval` before every read. Gives up with `Timeout`
    /// once `policy.timeout` has elapsed or `policy.max_attempts` reads have
    /// been made. Dropping the returned future stops polling.
    pub async fn wait_for_job(&self, job_id: &str, policy: &PollPolicy) -> AppResult<String> {
        let start = Instant::now();
        let mut attempts: u32 = 0;

        loop {
            let out_of_attempts = policy.max_attempts.map_or(false, |max| attempts >= max);
            let out_of_time = policy.timeout.map_or(false, |t| start.elapsed() >= t);
            if out_of_attempts || out_of_time {
                tracing::warn!(job_id, attempts, elapsed = ?start.elapsed(), "giving up on job");
                return Err(AppError::Timeout {
                    job_id: job_id.to_string(),
                    elapsed: start.elapsed(),
                    attempts,
                });
            }

            tokio::time::sleep(policy.interval).await;
            attempts += 1;

            let Some(snapshot) = self.job_status(job_id).await? else {
                tracing::warn!(job_id, "status response without job object");
                continue;
            };
            tracing::debug!(job_id, status = %snapshot.status, attempts, "Job status");

            match snapshot.status {
                JobStatus::Success => {
                    let url = snapshot.image_urls().first().map(|u| u.to_string()).ok_or_else(|| {
                        AppError::decode("job status", format!("job {} succeeded without an image url", job_id))
                    })?;
                    tracing::info!(job_id, image_url = %url, "Image generation successful");
                    return Ok(url);
                }
                JobStatus::Failed => {
                    tracing::error!(job_id, "Image generation failed");
                    return Err(AppError::JobFailed {
                        job_id: job_id.to_string(),
                        status: snapshot.status.to_string(),
                    });
                }
                _ => {}
            }
        }
    }

    /// Submit a bound job, wait for it and download its image.
    pub async fn run_job(&self, template_id: &str, fields: Vec<BoundField>) -> AppResult<PathBuf> {
        let request = JobRequest::new(template_id, fields);
        self.run_request(&request).await
    }

    pub async fn run_request(&self, request: &JobRequest) -> AppResult<PathBuf> {
        let job_id = self.submit_job(request).await?;
        let policy = self.config().poll.clone();
        let url = self.wait_for_job(&job_id, &policy).await?;
        self.retrieve(&url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_id_is_md5_of_unix_seconds() {
        let id = RequestId::from_unix_secs(1_700_000_000);
        assert_eq!(id.as_str(), format!("{:x}", md5::compute("1700000000")));
        assert_eq!(id.as_str().len(), 32);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn request_serializes_to_service_shape() {
        let req = JobRequest::with_request_id(
            RequestId::from_unix_secs(1),
            "688362427502551075",
            vec![BoundField::new("21", "image", "r1")],
        );
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(
            v,
            json!({
                "request_id": RequestId::from_unix_secs(1).as_str(),
                "templateId": "688362427502551075",
                "params": {"async": false, "priority": "NORMAL", "extraParams": {}},
                "fields": {"fieldAttrs": [{"nodeId": "21", "fieldName": "image", "fieldValue": "r1"}]}
            })
        );
    }

    #[test]
    fn status_parsing_keeps_unknown_values() {
        assert_eq!(JobStatus::parse("RUNNING"), JobStatus::Running);
        assert_eq!(JobStatus::parse("WAITING"), JobStatus::Other("WAITING".into()));
        assert!(JobStatus::Success.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::parse("success").is_terminal());
    }

    #[test]
    fn snapshot_exposes_image_urls() {
        let snap: JobSnapshot = serde_json::from_value(json!({
            "status": "SUCCESS",
            "successInfo": {"images": [{"url": "https://cdn/a.png"}, {"url": "https://cdn/b.png"}]}
        }))
        .unwrap();
        assert_eq!(snap.image_urls(), vec!["https://cdn/a.png", "https://cdn/b.png"]);

        let pending: JobSnapshot = serde_json::from_value(json!({"status": "PENDING"})).unwrap();
        assert!(pending.image_urls().is_empty());
    }

    #[test]
    fn snapshot_requires_status() {
        assert!(serde_json::from_value::<JobSnapshot>(json!({"successInfo": {}})).is_err());
    }
}

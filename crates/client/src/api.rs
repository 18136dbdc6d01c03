//! REST client for the Pixio HTTP endpoints.
//!
//! [`GenerationApi`] is the seam between the workflow logic (launcher,
//! poll loop, upload handshake) and the network. [`PixioApi`] is the
//! [`reqwest`] implementation used in production.

use async_trait::async_trait;
use pixio_core::error::ErrorKind;
use pixio_core::submission::Workflow;
use pixio_core::types::JobId;
use pixio_core::upload::UploadTicket;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};

use crate::config::{ClientConfig, Deployments};
use crate::messages::{RunRequest, RunResponse, StatusResponse};

/// Header telling the storage bucket to make the uploaded object readable.
const ACL_HEADER: &str = "x-amz-acl";
const ACL_PUBLIC_READ: &str = "public-read";

/// Errors from the REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote returned a non-2xx status code.
    #[error("Pixio API error ({status}): {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The remote answered 2xx but the body broke the contract.
    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Request(e) if e.is_decode() => ErrorKind::MalformedResponse,
            Self::Request(_) => ErrorKind::Network,
            Self::Status { .. } => ErrorKind::Rejected,
            Self::Malformed(_) => ErrorKind::MalformedResponse,
        }
    }
}

/// Operations the client needs from the remote generation service.
///
/// None of these retry internally; retry policy belongs to the caller.
#[async_trait]
pub trait GenerationApi: Send + Sync {
    /// Queue a text-to-image job.
    async fn submit_text_job(
        &self,
        positive_prompt: &str,
        negative_prompt: &str,
    ) -> Result<JobId, ApiError>;

    /// Queue an image-to-image job from an uploaded image's retrieval URL.
    async fn submit_image_job(&self, source_image_url: &str) -> Result<JobId, ApiError>;

    /// Queue a pose-guided job.
    async fn submit_pose_job(&self, pose_url: &str, prompt: &str) -> Result<JobId, ApiError>;

    /// Ask for a single-use upload destination for a file of this type and size.
    async fn get_upload_ticket(
        &self,
        content_type: &str,
        byte_size: u64,
    ) -> Result<UploadTicket, ApiError>;

    /// PUT the file bytes to the ticket's destination.
    ///
    /// `Content-Type` is `content_type` and `Content-Length` is
    /// `body.len()`. Returns `Ok` only on a success acknowledgment.
    async fn transfer_upload(
        &self,
        ticket: &UploadTicket,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<(), ApiError>;

    /// Current remote status of a job.
    async fn get_job_status(&self, job_id: &JobId) -> Result<StatusResponse, ApiError>;

    /// Fetch an artifact's bytes.
    async fn fetch_artifact(&self, url: &str) -> Result<Vec<u8>, ApiError>;
}

/// HTTP client for the Pixio API.
pub struct PixioApi {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    deployments: Deployments,
}

impl PixioApi {
    /// Build a client from configuration.
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self::with_client(client, config))
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, config: &ClientConfig) -> Self {
        Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            deployments: config.deployments.clone(),
        }
    }

    /// Base HTTP API URL.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    async fn submit_run(
        &self,
        workflow: Workflow,
        inputs: serde_json::Value,
    ) -> Result<JobId, ApiError> {
        let body = RunRequest {
            deployment_id: self.deployments.for_workflow(workflow),
            inputs,
        };

        let response = self
            .client
            .post(format!("{}/run", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let run: RunResponse = Self::parse_response(response).await?;
        tracing::debug!(%workflow, run_id = %run.run_id, "Run queued");
        Ok(run.run_id)
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl GenerationApi for PixioApi {
    async fn submit_text_job(
        &self,
        positive_prompt: &str,
        negative_prompt: &str,
    ) -> Result<JobId, ApiError> {
        let inputs = serde_json::json!({
            "positive_prompt": positive_prompt,
            "negative_prompt": negative_prompt,
        });
        self.submit_run(Workflow::TextToImage, inputs).await
    }

    async fn submit_image_job(&self, source_image_url: &str) -> Result<JobId, ApiError> {
        let inputs = serde_json::json!({ "input_image": source_image_url });
        self.submit_run(Workflow::ImageToImage, inputs).await
    }

    async fn submit_pose_job(&self, pose_url: &str, prompt: &str) -> Result<JobId, ApiError> {
        let inputs = serde_json::json!({
            "input_pose": pose_url,
            "positive_prompt": prompt,
        });
        self.submit_run(Workflow::PoseGuided, inputs).await
    }

    async fn get_upload_ticket(
        &self,
        content_type: &str,
        byte_size: u64,
    ) -> Result<UploadTicket, ApiError> {
        let response = self
            .client
            .get(format!("{}/upload-url", self.api_url))
            .bearer_auth(&self.api_key)
            .query(&[("type", content_type.to_string()), ("file_size", byte_size.to_string())])
            .send()
            .await?;

        Self::parse_response(response).await
    }

    async fn transfer_upload(
        &self,
        ticket: &UploadTicket,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<(), ApiError> {
        let length = body.len();
        let response = self
            .client
            .put(&ticket.upload_url)
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_LENGTH, length)
            .header(ACL_HEADER, ACL_PUBLIC_READ)
            .body(body)
            .send()
            .await?;

        Self::ensure_success(response).await?;
        Ok(())
    }

    async fn get_job_status(&self, job_id: &JobId) -> Result<StatusResponse, ApiError> {
        let response = self
            .client
            .get(format!("{}/run", self.api_url))
            .bearer_auth(&self.api_key)
            .query(&[("run_id", job_id.as_str())])
            .send()
            .await?;

        Self::parse_response(response).await
    }

    async fn fetch_artifact(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        let response = self.client.get(url).send().await?;
        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_is_rejected_kind() {
        let err = ApiError::Status {
            status: 402,
            body: "insufficient balance".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Rejected);
        assert_eq!(
            err.to_string(),
            "Pixio API error (402): insufficient balance"
        );
    }

    #[test]
    fn malformed_error_kind() {
        let err = ApiError::Malformed("missing field `run_id`".into());
        assert_eq!(err.kind(), ErrorKind::MalformedResponse);
    }

    #[test]
    fn client_builds_from_config() {
        let config = ClientConfig::from_lookup(|k| {
            Some(match k {
                "PIXIO_API_URL" => "http://localhost:9999/api".to_string(),
                "PIXIO_API_KEY" => "k".to_string(),
                "PIXIO_TXT2IMG_DEPLOYMENT" | "PIXIO_IMG2IMG_DEPLOYMENT" | "PIXIO_POSE_DEPLOYMENT" => {
                    "dep".to_string()
                }
                _ => return None,
            })
        })
        .unwrap();
        let api = PixioApi::new(&config).unwrap();
        assert_eq!(api.api_url(), "http://localhost:9999/api");
    }
}

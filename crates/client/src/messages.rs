//! Pixio REST payload types.
//!
//! The status endpoint returns JSON shaped like
//! `{"status": "<string>", "outputs": [{"data": {"images": [{"url": ...}]}}]}`.
//! This module deserializes those bodies and turns them into core
//! [`StatusUpdate`]s.

use pixio_core::job::{RemoteStatus, StatusUpdate};
use pixio_core::types::JobId;
use serde::{Deserialize, Serialize};

/// Response from `POST /run` after a job was queued.
#[derive(Debug, Clone, Deserialize)]
pub struct RunResponse {
    /// Server-assigned identifier for the queued run.
    #[serde(alias = "job_id")]
    pub run_id: JobId,
}

/// Body of `POST /run`.
#[derive(Debug, Clone, Serialize)]
pub struct RunRequest<'a> {
    pub deployment_id: &'a str,
    pub inputs: serde_json::Value,
}

/// Response from `GET /run?run_id=...`.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    /// Absent (or `null`) until the run has produced something.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub outputs: Vec<RunOutput>,
}

/// One node output of a run.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunOutput {
    #[serde(default)]
    pub data: OutputData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputData {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub images: Vec<OutputImage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputImage {
    pub url: String,
}

impl StatusResponse {
    /// Every image URL across all outputs, in order.
    pub fn image_urls(&self) -> Vec<String> {
        self.outputs
            .iter()
            .flat_map(|o| o.data.images.iter())
            .map(|img| img.url.clone())
            .filter(|url| !url.is_empty())
            .collect()
    }

    pub fn remote_status(&self) -> RemoteStatus {
        RemoteStatus::parse(&self.status)
    }

    /// Convert into a state-machine update.
    pub fn into_update(self) -> StatusUpdate {
        let outputs = self.image_urls();
        StatusUpdate::from_remote(self.remote_status(), self.status.trim(), outputs)
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

//! Submission model: the three generation workflows and their costs.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Cost constants
// ---------------------------------------------------------------------------

/// Credits charged per generated image.
pub const CREDITS_PER_IMAGE: u64 = 50;

/// Text-to-image launches this many independent submissions per click.
pub const TEXT_BATCH_SIZE: usize = 2;

/// Pose skeleton offered when the user does not pick one.
pub const DEFAULT_POSE_URL: &str =
    "https://pub-6230db03dc3a4861a9c3e55145ceda44.r2.dev/openpose-pose%20(1).png";

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// The three user-facing generation workflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Workflow {
    TextToImage,
    ImageToImage,
    PoseGuided,
}

impl Workflow {
    /// Number of remote jobs one launch of this workflow submits.
    pub fn submissions_per_launch(self) -> usize {
        match self {
            Self::TextToImage => TEXT_BATCH_SIZE,
            Self::ImageToImage | Self::PoseGuided => 1,
        }
    }

    /// Credits a launch requires (and deducts).
    pub fn cost(self) -> u64 {
        CREDITS_PER_IMAGE * self.submissions_per_launch() as u64
    }

    /// Whether a new launch replaces the job previously shown for this
    /// workflow. Text-to-image results accumulate instead.
    pub fn supersedes_previous(self) -> bool {
        !matches!(self, Self::TextToImage)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TextToImage => "txt2img",
            Self::ImageToImage => "img2img",
            Self::PoseGuided => "openpose",
        }
    }
}

impl fmt::Display for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// SubmissionRequest
// ---------------------------------------------------------------------------

/// One generation request, consumed exactly once by the launcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubmissionRequest {
    TextToImage {
        positive_prompt: String,
        negative_prompt: String,
    },
    ImageToImage {
        /// Retrieval reference of a completed upload.
        source_image_url: String,
    },
    PoseGuided {
        pose_url: String,
        prompt: String,
    },
}

impl SubmissionRequest {
    pub fn workflow(&self) -> Workflow {
        match self {
            Self::TextToImage { .. } => Workflow::TextToImage,
            Self::ImageToImage { .. } => Workflow::ImageToImage,
            Self::PoseGuided { .. } => Workflow::PoseGuided,
        }
    }

    /// Check the request before any credits are reserved.
    ///
    /// Prompts may be empty. Image references must be absolute http(s) URLs.
    pub fn validate(&self) -> Result<(), CoreError> {
        match self {
            Self::TextToImage { .. } => Ok(()),
            Self::ImageToImage { source_image_url } => {
                validate_reference_url("source image", source_image_url)
            }
            Self::PoseGuided { pose_url, .. } => validate_reference_url("pose", pose_url),
        }
    }
}

/// Validate that a reference URL is non-empty and starts with `http`.
pub fn validate_reference_url(what: &str, url: &str) -> Result<(), CoreError> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation(format!(
            "{what} URL must not be empty"
        )));
    }
    if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
        return Err(CoreError::Validation(format!(
            "{what} URL must start with http:// or https://, got: '{trimmed}'"
        )));
    }
    Ok(())
}

//! Upload ticket and local file description for the upload handshake.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Status line shown while a file is being negotiated and transferred.
pub const STATUS_UPLOADING: &str = "Uploading...";
/// Status line shown once the upload is accepted and the job submitted.
pub const STATUS_PROCESSING: &str = "Processing...";

/// Single-use pair returned by the remote for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTicket {
    /// Pre-signed destination for the raw PUT.
    pub upload_url: String,
    /// Where the remote will read the file back from once uploaded.
    pub download_url: String,
}

/// A local file ready to be uploaded.
///
/// The declared size is always the length of `bytes`, so the ticket
/// request and the transfer headers cannot disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Result<Self, CoreError> {
        let content_type = content_type.into();
        if content_type.trim().is_empty() {
            return Err(CoreError::Validation(
                "Upload content type must not be empty".to_string(),
            ));
        }
        if bytes.is_empty() {
            return Err(CoreError::Validation("Upload file is empty".to_string()));
        }
        Ok(Self {
            file_name: file_name.into(),
            content_type,
            bytes,
        })
    }

    pub fn byte_size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Guess an image content type from a file name's extension.
pub fn content_type_for(file_name: &str) -> Option<&'static str> {
    let ext = file_name.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}

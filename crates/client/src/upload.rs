//! Two-step upload handshake: negotiate a ticket, then PUT the bytes.

use std::path::Path;

use pixio_core::error::{CoreError, ErrorKind};
use pixio_core::upload::{content_type_for, UploadFile};

use crate::api::{ApiError, GenerationApi};

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// The remote refused to hand out an upload ticket.
    #[error("Upload negotiation failed: {0}")]
    Negotiation(#[source] ApiError),

    /// The PUT to the ticket's destination failed.
    #[error("Upload transfer failed: {0}")]
    Transfer(#[source] ApiError),
}

impl UploadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Negotiation(e) | Self::Transfer(e) => e.kind(),
        }
    }
}

/// Upload `file` and return the retrieval reference for it.
///
/// The transfer is only attempted once a ticket was granted, and the
/// reference is only returned after the transfer was acknowledged.
pub async fn upload_file(api: &dyn GenerationApi, file: &UploadFile) -> Result<String, UploadError> {
    let ticket = api
        .get_upload_ticket(&file.content_type, file.byte_size())
        .await
        .map_err(UploadError::Negotiation)?;

    tracing::debug!(
        file_name = %file.file_name,
        content_type = %file.content_type,
        byte_size = file.byte_size(),
        "Upload ticket granted",
    );

    api.transfer_upload(&ticket, &file.content_type, file.bytes.clone())
        .await
        .map_err(UploadError::Transfer)?;

    tracing::info!(file_name = %file.file_name, download_url = %ticket.download_url, "File uploaded");
    Ok(ticket.download_url)
}

/// Errors from reading a local file for upload.
#[derive(Debug, thiserror::Error)]
pub enum ReadFileError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot determine an image content type for {0}")]
    UnknownContentType(String),

    #[error(transparent)]
    Invalid(#[from] CoreError),
}

/// Load an image from disk, detecting its content type from the extension.
pub async fn read_upload_file(path: &Path) -> Result<UploadFile, ReadFileError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let content_type = content_type_for(&file_name)
        .ok_or_else(|| ReadFileError::UnknownContentType(path.display().to_string()))?;

    let bytes = tokio::fs::read(path).await.map_err(|source| ReadFileError::Io {
        path: path.display().to_string(),
        source,
    })?;

    Ok(UploadFile::new(file_name, content_type, bytes)?)
}

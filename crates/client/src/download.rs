//! Best-effort artifact download.

use std::path::{Component, Path, PathBuf};

use pixio_core::presenter::artifact_file_name;

use crate::api::{ApiError, GenerationApi};

#[derive(Debug, thiserror::Error)]
enum DownloadError {
    #[error(transparent)]
    Fetch(#[from] ApiError),

    #[error("Refusing to write outside the output directory: {0}")]
    UnsafeName(String),

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Fetch the artifact at `url` and save it under `out_dir`.
///
/// The file name comes from [`artifact_file_name`], so the file always lands
/// directly in `out_dir`. Failures are logged and yield `None`; they never
/// affect job state.
pub async fn save_artifact(
    api: &dyn GenerationApi,
    url: &str,
    out_dir: &Path,
    prefix: Option<&str>,
) -> Option<PathBuf> {
    let file_name = artifact_file_name(prefix, url);
    let path = out_dir.join(&file_name);

    let saved = if is_single_component(&file_name) {
        try_save(api, url, &path).await
    } else {
        Err(DownloadError::UnsafeName(file_name))
    };
    match saved {
        Ok(bytes) => {
            tracing::info!(url, path = %path.display(), bytes, "Artifact saved");
            Some(path)
        }
        Err(e) => {
            tracing::error!(url, error = %e, "Artifact download failed");
            None
        }
    }
}

fn is_single_component(file_name: &str) -> bool {
    let mut components = Path::new(file_name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

async fn try_save(api: &dyn GenerationApi, url: &str, path: &Path) -> Result<usize, DownloadError> {
    let bytes = api.fetch_artifact(url).await?;
    let write_err = |source| DownloadError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    tokio::fs::write(path, &bytes).await.map_err(write_err)?;
    Ok(bytes.len())
}

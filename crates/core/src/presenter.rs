//! Pure mapping from a job's state to what the user should see.

use std::fmt;

use crate::job::{Job, JobPhase};

/// File name used when nothing usable can be derived from the artifact URL.
pub const DEFAULT_DOWNLOAD_NAME: &str = "generated-image.png";

/// Generic message shown when a failure carries no detail.
pub const GENERIC_ERROR_TEXT: &str = "Error occurred.";

/// What a view should render for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presentation {
    /// Nothing submitted yet.
    Idle,
    /// Spinner plus the latest status line.
    Loading { status_text: String },
    /// The artifact, with a download action.
    Ready { image_url: String, file_name: String },
    /// Error affordance.
    Error { message: String },
}

impl Presentation {
    pub fn download_target(&self) -> Option<(&str, &str)> {
        match self {
            Self::Ready {
                image_url,
                file_name,
            } => Some((image_url.as_str(), file_name.as_str())),
            _ => None,
        }
    }
}

impl fmt::Display for Presentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Loading { status_text } => write!(f, "{status_text} ..."),
            Self::Ready { image_url, .. } => write!(f, "ready: {image_url}"),
            Self::Error { message } => write!(f, "error: {message}"),
        }
    }
}

/// Render a job.
pub fn present(job: &Job) -> Presentation {
    match job.phase {
        JobPhase::Idle => Presentation::Idle,
        JobPhase::Pending | JobPhase::Processing => Presentation::Loading {
            status_text: job
                .status_text
                .clone()
                .unwrap_or_else(|| job.phase.as_str().to_string()),
        },
        JobPhase::Success => match job.primary_output() {
            Some(url) => Presentation::Ready {
                image_url: url.to_string(),
                file_name: download_file_name(url),
            },
            None => Presentation::Error {
                message: GENERIC_ERROR_TEXT.to_string(),
            },
        },
        JobPhase::Failure => Presentation::Error {
            message: job
                .error
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| GENERIC_ERROR_TEXT.to_string()),
        },
    }
}

/// Derive a local file name from an artifact URL.
///
/// Takes the last path segment, stripping query and fragment. Falls back to
/// [`DEFAULT_DOWNLOAD_NAME`] when there is no segment or it has no
/// extension.
pub fn download_file_name(url: &str) -> String {
    let clean = url.split('?').next().unwrap_or(url);
    let clean = clean.split('#').next().unwrap_or(clean);

    let path = match clean
        .strip_prefix("https://")
        .or_else(|| clean.strip_prefix("http://"))
    {
        Some(rest) => rest.find('/').map(|i| &rest[i..]).unwrap_or(""),
        None => clean,
    };

    match path.rsplit('/').find(|s| !s.is_empty()) {
        Some(segment) if is_plain_file_name(segment) => segment.to_string(),
        _ => DEFAULT_DOWNLOAD_NAME.to_string(),
    }
}

/// Local file name for an artifact, prefixed with `prefix` when given.
///
/// The prefix usually is a remote-issued job id, so path separators and
/// `..` in it are replaced with `_`. The result never leaves the directory
/// it is joined onto.
pub fn artifact_file_name(prefix: Option<&str>, url: &str) -> String {
    let name = download_file_name(url);
    match prefix.map(sanitize_component).filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{prefix}-{name}"),
        None => name,
    }
}

fn is_plain_file_name(segment: &str) -> bool {
    segment.contains('.')
        && !segment.trim_matches('.').is_empty()
        && !segment.contains("..")
        && !segment.contains('\\')
}

fn sanitize_component(raw: &str) -> String {
    raw.replace("..", "_")
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, JobError};
    use crate::job::StatusUpdate;
    use crate::types::JobId;

    fn pending() -> Job {
        Job::pending(JobId::new("run-9").unwrap())
    }

    #[test]
    fn idle_slot_presents_idle() {
        assert_eq!(present(&Job::idle()), Presentation::Idle);
    }

    #[test]
    fn pending_shows_loading_with_status() {
        let p = present(&pending());
        assert_eq!(
            p,
            Presentation::Loading {
                status_text: "preparing".into()
            }
        );
    }

    #[test]
    fn success_exposes_download() {
        let mut job = pending();
        job.apply(StatusUpdate::Succeeded {
            outputs: vec![
                "https://cdn.example.com/out/ComfyUI_0001.png?sig=abc".into(),
                "https://cdn.example.com/out/ComfyUI_0002.png".into(),
            ],
        });
        let p = present(&job);
        assert_eq!(
            p.download_target(),
            Some((
                "https://cdn.example.com/out/ComfyUI_0001.png?sig=abc",
                "ComfyUI_0001.png"
            ))
        );
    }

    #[test]
    fn failure_shows_error_with_kind() {
        let mut job = pending();
        job.fail(JobError::new(ErrorKind::RemoteFailure, "Remote reported status 'failed'"));
        assert_eq!(
            present(&job),
            Presentation::Error {
                message: "remote-failure: Remote reported status 'failed'".into()
            }
        );
    }

    #[test]
    fn refused_submission_presents_error() {
        let job = Job::rejected(JobError::new(ErrorKind::Rejected, "status 402"));
        assert_eq!(job.id, None);
        assert_eq!(
            present(&job),
            Presentation::Error {
                message: "rejected: status 402".into()
            }
        );
    }

    #[test]
    fn dot_segments_never_become_file_names() {
        assert_eq!(download_file_name("https://cdn.example.com/out/."), DEFAULT_DOWNLOAD_NAME);
        assert_eq!(download_file_name("https://cdn.example.com/out/.."), DEFAULT_DOWNLOAD_NAME);
        assert_eq!(download_file_name("../../etc/x.png"), "x.png");
        assert_eq!(
            download_file_name("https://cdn.example.com/out/..%2F..%2Fx.png"),
            DEFAULT_DOWNLOAD_NAME
        );
        assert_eq!(
            download_file_name("https://cdn.example.com/out/a\\b.png"),
            DEFAULT_DOWNLOAD_NAME
        );
    }

    #[test]
    fn prefix_is_flattened_to_one_component() {
        let url = "https://cdn.example.com/out/result.png";
        assert_eq!(artifact_file_name(Some("run-1"), url), "run-1-result.png");
        assert_eq!(artifact_file_name(Some("../escaped"), url), "__escaped-result.png");
        assert_eq!(artifact_file_name(Some("a/b\\c"), url), "a_b_c-result.png");
        assert_eq!(artifact_file_name(Some(""), url), "result.png");
        assert_eq!(artifact_file_name(None, url), "result.png");
    }

    #[test]
    fn file_name_falls_back_to_default() {
        assert_eq!(download_file_name("https://cdn.example.com/"), DEFAULT_DOWNLOAD_NAME);
        assert_eq!(
            download_file_name("https://cdn.example.com/blob/abc123"),
            DEFAULT_DOWNLOAD_NAME
        );
        assert_eq!(
            download_file_name("https://cdn.example.com/x/result.webp#frag"),
            "result.webp"
        );
    }
}

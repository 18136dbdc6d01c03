//! Job lifecycle events broadcast by the tracker.
//!
//! Per-job observers normally hold a `watch` receiver for the latest
//! snapshot; these events are the cross-job feed for anything that wants
//! to see every transition (logging, a status bar, tests).

use pixio_core::error::{ErrorKind, JobError};
use pixio_core::job::{Job, JobPhase};
use pixio_core::types::JobId;
use serde::Serialize;

/// A lifecycle event for one tracked job.
#[derive(Debug, Clone, Serialize)]
pub enum JobEvent {
    /// A poll loop was started for this job.
    Tracked { job_id: JobId },

    /// The job moved phase or its status text changed.
    StatusChanged {
        job_id: JobId,
        phase: JobPhase,
        status_text: Option<String>,
    },

    /// The job finished successfully.
    Completed {
        job_id: JobId,
        /// Artifact URLs, first one is the presented result.
        outputs: Vec<String>,
    },

    /// The job ended in failure (remote error, unreachable remote, ...).
    Failed { job_id: JobId, error: JobError },

    /// Tracking was cancelled before the job finished.
    Cancelled { job_id: JobId },
}

impl JobEvent {
    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Tracked { job_id }
            | Self::StatusChanged { job_id, .. }
            | Self::Completed { job_id, .. }
            | Self::Failed { job_id, .. }
            | Self::Cancelled { job_id } => job_id,
        }
    }

    /// The event describing `job` right after a change was applied.
    pub fn for_snapshot(job_id: &JobId, job: &Job) -> Self {
        let job_id = job_id.clone();
        match job.phase {
            JobPhase::Success => Self::Completed {
                job_id,
                outputs: job.outputs.clone(),
            },
            JobPhase::Failure => match &job.error {
                Some(error) if error.kind == ErrorKind::Cancelled => Self::Cancelled { job_id },
                Some(error) => Self::Failed {
                    job_id,
                    error: error.clone(),
                },
                None => Self::Failed {
                    job_id,
                    error: JobError::new(ErrorKind::RemoteFailure, "unknown failure"),
                },
            },
            phase => Self::StatusChanged {
                job_id,
                phase,
                status_text: job.status_text.clone(),
            },
        }
    }
}

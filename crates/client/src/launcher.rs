//! Job launcher: credit gate, submission, and hand-off to the tracker.
//!
//! A launch runs in a fixed order:
//!
//! 1. validate the request,
//! 2. mark the workflow busy (one launch per workflow at a time),
//! 3. reserve the workflow's cost from the [`CreditLedger`],
//! 4. upload the source file (image-to-image only),
//! 5. submit to the remote; each accepted job is tracked as soon as its own
//!    submission returns, without waiting for its siblings.
//!
//! The reservation is committed by the first accepted submission and
//! refunded when none is accepted, including when the launch future is
//! dropped before any submission returned.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::join_all;
use pixio_core::credits::{CreditLedger, Reservation};
use pixio_core::error::{CoreError, ErrorKind, JobError};
use pixio_core::job::Job;
use pixio_core::presenter::GENERIC_ERROR_TEXT;
use pixio_core::submission::{SubmissionRequest, Workflow};
use pixio_core::types::{JobId, Timestamp};
use pixio_core::upload::{UploadFile, STATUS_PROCESSING, STATUS_UPLOADING};
use tokio::sync::watch;

use crate::api::{ApiError, GenerationApi};
use crate::tracker::JobTracker;
use crate::upload::{upload_file, UploadError};

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    /// The workflow already has a launch in flight.
    #[error("A {0} launch is already in progress")]
    Busy(Workflow),

    /// Invalid request or not enough credits.
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    /// Every submission of the launch was refused or never arrived.
    #[error("Submission failed: {0}")]
    Submit(#[from] ApiError),
}

impl LaunchError {
    /// Error kind for launches that reached the remote.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Busy(_) | Self::Core(_) => None,
            Self::Upload(e) => Some(e.kind()),
            Self::Submit(e) => Some(e.kind()),
        }
    }
}

/// One accepted remote job and its snapshot stream.
#[derive(Debug)]
pub struct TrackedJob {
    pub job_id: JobId,
    pub updates: watch::Receiver<Job>,
}

impl TrackedJob {
    pub fn snapshot(&self) -> Job {
        self.updates.borrow().clone()
    }

    /// Wait until the job reaches a terminal phase and return it.
    pub async fn wait_terminal(&mut self) -> Job {
        loop {
            {
                let job = self.updates.borrow_and_update();
                if job.phase.is_terminal() {
                    return job.clone();
                }
            }
            if self.updates.changed().await.is_err() {
                // Loop gone; whatever it last published is final.
                return self.updates.borrow().clone();
            }
        }
    }
}

/// Result of a successful launch.
#[derive(Debug)]
pub struct Launch {
    pub workflow: Workflow,
    pub jobs: Vec<TrackedJob>,
    /// Sibling submissions that were refused, as terminal `failure` slots.
    /// Never fatal when `jobs` is non-empty.
    pub failures: Vec<Job>,
    /// Credits deducted by this launch.
    pub charged: u64,
    pub launched_at: Timestamp,
}

/// Launches generation jobs against the shared ledger and tracker.
pub struct JobLauncher {
    api: Arc<dyn GenerationApi>,
    tracker: Arc<JobTracker>,
    ledger: Arc<CreditLedger>,
    busy: Mutex<HashSet<Workflow>>,
    /// Jobs currently shown per workflow.
    shown: tokio::sync::Mutex<HashMap<Workflow, Vec<JobId>>>,
    upload_status: watch::Sender<Option<String>>,
}

impl JobLauncher {
    pub fn new(
        api: Arc<dyn GenerationApi>,
        tracker: Arc<JobTracker>,
        ledger: Arc<CreditLedger>,
    ) -> Self {
        let (upload_status, _) = watch::channel(None);
        Self {
            api,
            tracker,
            ledger,
            busy: Mutex::new(HashSet::new()),
            shown: tokio::sync::Mutex::new(HashMap::new()),
            upload_status,
        }
    }

    pub fn ledger(&self) -> &Arc<CreditLedger> {
        &self.ledger
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.tracker
    }

    /// Whether `workflow` has a launch in flight.
    pub fn is_busy(&self, workflow: Workflow) -> bool {
        self.lock_busy().contains(&workflow)
    }

    /// Human-readable status of the image-to-image upload flow.
    pub fn upload_status(&self) -> watch::Receiver<Option<String>> {
        self.upload_status.subscribe()
    }

    /// Jobs currently shown for `workflow`.
    pub async fn shown_jobs(&self, workflow: Workflow) -> Vec<JobId> {
        self.shown
            .lock()
            .await
            .get(&workflow)
            .cloned()
            .unwrap_or_default()
    }

    /// Launch a text-to-image pair. Either prompt may be empty.
    pub async fn launch_text_to_image(
        &self,
        positive_prompt: impl Into<String>,
        negative_prompt: impl Into<String>,
    ) -> Result<Launch, LaunchError> {
        self.launch(SubmissionRequest::TextToImage {
            positive_prompt: positive_prompt.into(),
            negative_prompt: negative_prompt.into(),
        })
        .await
    }

    /// Launch a pose-guided job.
    pub async fn launch_pose_guided(
        &self,
        pose_url: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Result<Launch, LaunchError> {
        self.launch(SubmissionRequest::PoseGuided {
            pose_url: pose_url.into(),
            prompt: prompt.into(),
        })
        .await
    }

    /// Upload `file` and launch an image-to-image job from it.
    ///
    /// Progress is published on [`upload_status`](Self::upload_status).
    pub async fn launch_image_to_image(&self, file: UploadFile) -> Result<Launch, LaunchError> {
        let workflow = Workflow::ImageToImage;
        let _busy = self.mark_busy(workflow)?;
        let reservation = self.ledger.reserve(workflow.cost())?;

        self.set_upload_status(STATUS_UPLOADING);
        let source_image_url = match upload_file(self.api.as_ref(), &file).await {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(file_name = %file.file_name, error = %e, "Upload failed");
                self.set_upload_status(GENERIC_ERROR_TEXT);
                return Err(e.into());
            }
        };

        let request = SubmissionRequest::ImageToImage { source_image_url };
        request.validate()?;
        let result = self.submit(request, reservation).await;
        match &result {
            Ok(_) => self.set_upload_status(STATUS_PROCESSING),
            Err(_) => self.set_upload_status(GENERIC_ERROR_TEXT),
        }
        result
    }

    /// Launch an already-built request.
    ///
    /// `ImageToImage` requests must carry the retrieval reference of a
    /// completed upload.
    pub async fn launch(&self, request: SubmissionRequest) -> Result<Launch, LaunchError> {
        request.validate()?;
        let _busy = self.mark_busy(request.workflow())?;
        let reservation = self.ledger.reserve(request.workflow().cost())?;
        self.submit(request, reservation).await
    }

    // ---- private helpers ----

    async fn submit(
        &self,
        request: SubmissionRequest,
        reservation: Reservation,
    ) -> Result<Launch, LaunchError> {
        let workflow = request.workflow();
        let count = workflow.submissions_per_launch();
        let charged = reservation.amount();
        // Taken and committed by the first accepted submission.
        let unsettled = Mutex::new(Some(reservation));

        let results =
            join_all((0..count).map(|_| self.submit_and_track(&request, &unsettled))).await;

        let mut jobs = Vec::with_capacity(count);
        let mut failures = Vec::new();
        let mut last_error = None;
        for result in results {
            match result {
                Ok(job) => jobs.push(job),
                Err(e) => {
                    failures.push(Job::rejected(JobError::new(e.kind(), e.to_string())));
                    last_error = Some(e);
                }
            }
        }

        if jobs.is_empty() {
            if let Some(reservation) = take_reservation(&unsettled) {
                reservation.release();
            }
            return Err(match last_error {
                Some(e) => LaunchError::Submit(e),
                None => LaunchError::Core(CoreError::Conflict(format!(
                    "{workflow} launch produced no submissions"
                ))),
            });
        }

        tracing::info!(
            %workflow,
            jobs = jobs.len(),
            failed = failures.len(),
            charged,
            balance = self.ledger.available(),
            "Launch submitted",
        );

        Ok(Launch {
            workflow,
            jobs,
            failures,
            charged,
            launched_at: chrono::Utc::now(),
        })
    }

    /// Submit once and, if accepted, settle the launch's reservation and
    /// start tracking right away.
    async fn submit_and_track(
        &self,
        request: &SubmissionRequest,
        unsettled: &Mutex<Option<Reservation>>,
    ) -> Result<TrackedJob, ApiError> {
        let workflow = request.workflow();
        let job_id = match self.submit_once(request).await {
            Ok(job_id) => job_id,
            Err(e) => {
                tracing::warn!(%workflow, error = %e, "Submission failed");
                return Err(e);
            }
        };

        if let Some(reservation) = take_reservation(unsettled) {
            reservation.commit();
        }
        let updates = self.tracker.track(job_id.clone()).await;
        self.show(workflow, std::slice::from_ref(&job_id)).await;
        tracing::debug!(%workflow, %job_id, "Submission accepted");

        Ok(TrackedJob { job_id, updates })
    }

    async fn submit_once(&self, request: &SubmissionRequest) -> Result<JobId, ApiError> {
        match request {
            SubmissionRequest::TextToImage {
                positive_prompt,
                negative_prompt,
            } => self.api.submit_text_job(positive_prompt, negative_prompt).await,
            SubmissionRequest::ImageToImage { source_image_url } => {
                self.api.submit_image_job(source_image_url).await
            }
            SubmissionRequest::PoseGuided { pose_url, prompt } => {
                self.api.submit_pose_job(pose_url, prompt).await
            }
        }
    }

    /// Record `ids` as shown for `workflow`, releasing whatever they
    /// supersede.
    async fn show(&self, workflow: Workflow, ids: &[JobId]) {
        let mut shown = self.shown.lock().await;
        let entry = shown.entry(workflow).or_default();

        if workflow.supersedes_previous() {
            for old in entry.drain(..) {
                tracing::debug!(%workflow, job_id = %old, "Superseded by a newer launch");
                self.tracker.release(&old).await;
            }
        } else {
            // Keep accumulating, but forget jobs that are already done.
            let mut live = Vec::with_capacity(entry.len());
            for id in entry.drain(..) {
                let alive = self.tracker.snapshot(&id).await;
                if alive.is_some_and(|job| !job.phase.is_terminal()) {
                    live.push(id);
                }
            }
            *entry = live;
        }
        entry.extend(ids.iter().cloned());
    }

    fn mark_busy(&self, workflow: Workflow) -> Result<BusyGuard<'_>, LaunchError> {
        if !self.lock_busy().insert(workflow) {
            return Err(LaunchError::Busy(workflow));
        }
        Ok(BusyGuard {
            busy: &self.busy,
            workflow,
        })
    }

    fn lock_busy(&self) -> std::sync::MutexGuard<'_, HashSet<Workflow>> {
        self.busy.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_upload_status(&self, text: &str) {
        self.upload_status.send_replace(Some(text.to_string()));
    }
}

fn take_reservation(unsettled: &Mutex<Option<Reservation>>) -> Option<Reservation> {
    unsettled
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
}

/// Clears the workflow's busy flag when the launch finishes.
struct BusyGuard<'a> {
    busy: &'a Mutex<HashSet<Workflow>>,
    workflow: Workflow,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.workflow);
    }
}

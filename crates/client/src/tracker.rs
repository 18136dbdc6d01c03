//! Shared job tracker.
//!
//! [`JobTracker`] owns one poll loop per tracked [`JobId`]. Observers that
//! track the same job share the loop and receive the same `watch` snapshot
//! stream; the loop is cancelled once the last observer releases it (or
//! on an explicit [`JobTracker::cancel`]). Every transition is also
//! broadcast as a [`JobEvent`]. Call [`JobTracker::subscribe`] to receive
//! them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use pixio_core::job::Job;
use pixio_core::types::JobId;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::GenerationApi;
use crate::config::PollConfig;
use crate::events::JobEvent;
use crate::poller::run_poll_loop;

/// Broadcast channel capacity for job events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long shutdown waits for each poll loop to exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

type JobMap = Arc<RwLock<HashMap<JobId, TrackedEntry>>>;

/// Tracks remote jobs until they reach a terminal phase.
///
/// Created via [`JobTracker::new`]; the returned `Arc` is shared between
/// the launcher and any view that wants to follow a job.
pub struct JobTracker {
    api: Arc<dyn GenerationApi>,
    poll: PollConfig,
    /// Live poll loops indexed by job id.
    jobs: JobMap,
    event_tx: broadcast::Sender<JobEvent>,
    /// Master cancellation token -- cancelled during shutdown.
    cancel: CancellationToken,
}

/// Internal bookkeeping for a single tracked job.
struct TrackedEntry {
    /// Distinguishes this loop from a later one for the same id.
    generation: Uuid,
    /// Number of observers that have not released the job yet.
    interest: usize,
    state: watch::Receiver<Job>,
    task_handle: JoinHandle<()>,
    /// Per-job cancellation token (child of the master token).
    cancel: CancellationToken,
}

impl JobTracker {
    pub fn new(api: Arc<dyn GenerationApi>, poll: PollConfig) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            api,
            poll,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            cancel: CancellationToken::new(),
        })
    }

    /// Subscribe to lifecycle events of every tracked job.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.event_tx.subscribe()
    }

    /// Start (or join) tracking `job_id` and return its snapshot stream.
    ///
    /// The first call for an id spawns the poll loop with the job in
    /// `pending`. Later calls while the loop is alive share it and add one
    /// unit of interest; each call should be paired with a
    /// [`release`](Self::release).
    pub async fn track(&self, job_id: JobId) -> watch::Receiver<Job> {
        let mut jobs = self.jobs.write().await;

        if let Some(entry) = jobs.get_mut(&job_id) {
            if !entry.cancel.is_cancelled() {
                entry.interest += 1;
                tracing::debug!(job_id = %job_id, interest = entry.interest, "Joined existing poll loop");
                return entry.state.clone();
            }
        }

        let (state_tx, state_rx) = watch::channel(Job::pending(job_id.clone()));
        let generation = Uuid::new_v4();
        let job_cancel = self.cancel.child_token();

        let api = Arc::clone(&self.api);
        let poll = self.poll.clone();
        let map = Arc::clone(&self.jobs);
        let event_tx = self.event_tx.clone();
        let cancel_clone = job_cancel.clone();
        let id = job_id.clone();

        let task_handle = tokio::spawn(async move {
            let job = run_poll_loop(api, id.clone(), &poll, &state_tx, &event_tx, &cancel_clone).await;
            tracing::info!(job_id = %id, phase = job.phase.as_str(), "Stopped tracking job");

            let mut jobs = map.write().await;
            if jobs.get(&id).is_some_and(|e| e.generation == generation) {
                jobs.remove(&id);
            }
        });

        jobs.insert(
            job_id.clone(),
            TrackedEntry {
                generation,
                interest: 1,
                state: state_rx.clone(),
                task_handle,
                cancel: job_cancel,
            },
        );
        drop(jobs);

        tracing::info!(job_id = %job_id, "Tracking job");
        let _ = self.event_tx.send(JobEvent::Tracked { job_id });
        state_rx
    }

    /// Drop one unit of interest in `job_id`.
    ///
    /// When no interest remains the poll loop is cancelled. Returns `false`
    /// if the job is not being tracked.
    pub async fn release(&self, job_id: &JobId) -> bool {
        let mut jobs = self.jobs.write().await;
        let Some(entry) = jobs.get_mut(job_id) else {
            return false;
        };

        entry.interest = entry.interest.saturating_sub(1);
        if entry.interest == 0 {
            tracing::debug!(job_id = %job_id, "Last observer released job, cancelling poll loop");
            entry.cancel.cancel();
        }
        true
    }

    /// Stop tracking `job_id` regardless of remaining interest.
    ///
    /// The job ends in `failure` with kind `cancelled`; an in-flight status
    /// check is discarded. Returns `false` if the job is not being tracked.
    pub async fn cancel(&self, job_id: &JobId) -> bool {
        let jobs = self.jobs.read().await;
        match jobs.get(job_id) {
            Some(entry) => {
                tracing::info!(job_id = %job_id, "Cancelling job tracking");
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Latest snapshot of a job that is still being tracked.
    pub async fn snapshot(&self, job_id: &JobId) -> Option<Job> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .map(|e| e.state.borrow().clone())
    }

    /// IDs of all jobs that still have a live poll loop.
    pub async fn active_job_ids(&self) -> Vec<JobId> {
        self.jobs.read().await.keys().cloned().collect()
    }

    /// Cancel every poll loop and wait for them to exit.
    ///
    /// Waits up to 5 seconds per loop.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down job tracker");
        self.cancel.cancel();

        // Loops remove their own entry on exit, so the lock must be free
        // while waiting on them.
        let entries: Vec<_> = self.jobs.write().await.drain().collect();
        for (id, entry) in entries {
            tracing::debug!(job_id = %id, "Stopping poll loop");
            entry.cancel.cancel();
            if tokio::time::timeout(SHUTDOWN_GRACE, entry.task_handle).await.is_err() {
                tracing::warn!(job_id = %id, "Poll loop did not stop in time");
            }
        }

        tracing::info!("Job tracker shut down complete");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use pixio_core::error::ErrorKind;
    use pixio_core::job::JobPhase;
    use pixio_core::upload::UploadTicket;

    use super::*;
    use crate::api::ApiError;
    use crate::messages::StatusResponse;

    /// Every job stays `processing` forever.
    #[derive(Default)]
    struct AlwaysProcessing {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GenerationApi for AlwaysProcessing {
        async fn submit_text_job(&self, _: &str, _: &str) -> Result<JobId, ApiError> {
            unimplemented!()
        }
        async fn submit_image_job(&self, _: &str) -> Result<JobId, ApiError> {
            unimplemented!()
        }
        async fn submit_pose_job(&self, _: &str, _: &str) -> Result<JobId, ApiError> {
            unimplemented!()
        }
        async fn get_upload_ticket(&self, _: &str, _: u64) -> Result<UploadTicket, ApiError> {
            unimplemented!()
        }
        async fn transfer_upload(&self, _: &UploadTicket, _: &str, _: Vec<u8>) -> Result<(), ApiError> {
            unimplemented!()
        }
        async fn fetch_artifact(&self, _: &str) -> Result<Vec<u8>, ApiError> {
            unimplemented!()
        }
        async fn get_job_status(&self, _: &JobId) -> Result<StatusResponse, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(StatusResponse {
                status: "processing".into(),
                outputs: Vec::new(),
            })
        }
    }

    fn tracker() -> (Arc<JobTracker>, Arc<AlwaysProcessing>) {
        let api = Arc::new(AlwaysProcessing::default());
        let tracker = JobTracker::new(Arc::clone(&api) as Arc<dyn GenerationApi>, PollConfig::default());
        (tracker, api)
    }

    #[tokio::test(start_paused = true)]
    async fn observers_share_one_loop() {
        let (tracker, api) = tracker();
        let id = JobId::new("shared").unwrap();

        let first = tracker.track(id.clone()).await;
        let second = tracker.track(id.clone()).await;
        assert_eq!(tracker.active_job_ids().await, vec![id.clone()]);

        tokio::time::sleep(Duration::from_millis(4_500)).await;
        // Ticks at 2s and 4s from a single loop.
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
        assert_eq!(first.borrow().phase, JobPhase::Processing);
        assert_eq!(second.borrow().phase, JobPhase::Processing);

        tracker.release(&id).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(tracker.snapshot(&id).await.unwrap().phase, JobPhase::Processing);

        tracker.release(&id).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(tracker.active_job_ids().await.is_empty());

        let last = first.borrow().clone();
        assert_eq!(last.phase, JobPhase::Failure);
        assert_eq!(last.error.unwrap().kind, ErrorKind::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_cancel_emits_event() {
        let (tracker, _) = tracker();
        let mut events = tracker.subscribe();
        let id = JobId::new("to-cancel").unwrap();

        let _rx = tracker.track(id.clone()).await;
        assert!(tracker.cancel(&id).await);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut saw_cancelled = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, JobEvent::Cancelled { .. }) {
                saw_cancelled = true;
            }
        }
        assert!(saw_cancelled);
        assert!(!tracker.cancel(&id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn release_unknown_job() {
        let (tracker, _) = tracker();
        assert!(!tracker.release(&JobId::new("nope").unwrap()).await);
        assert!(tracker.snapshot(&JobId::new("nope").unwrap()).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_everything() {
        let (tracker, api) = tracker();
        let a = tracker.track(JobId::new("a").unwrap()).await;
        let _b = tracker.track(JobId::new("b").unwrap()).await;

        tracker.shutdown().await;
        assert!(tracker.active_job_ids().await.is_empty());
        assert_eq!(a.borrow().phase, JobPhase::Failure);

        let calls = api.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(api.calls.load(Ordering::SeqCst), calls);
    }
}

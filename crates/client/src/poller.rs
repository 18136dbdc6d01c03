//! Poll loop for a single remote job.
//!
//! [`run_poll_loop`] checks the job's status on a wall-clock interval and
//! publishes every accepted change to a `watch` channel and the tracker's
//! event broadcast. The loop:
//!
//! - keeps at most one status check in flight; a tick that fires while the
//!   previous check is unresolved is skipped,
//! - after a failed check waits an exponentially growing delay, and marks
//!   the job `unreachable` once `max_consecutive_failures` checks in a row
//!   have failed,
//! - stops right after a terminal status is applied,
//! - on cancellation drops any in-flight check, so a response that arrives
//!   afterwards can never be applied.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use pixio_core::error::{ErrorKind, JobError};
use pixio_core::job::{Applied, Job};
use pixio_core::types::JobId;
use tokio::sync::{broadcast, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::api::{ApiError, GenerationApi};
use crate::backoff::delay_after;
use crate::config::PollConfig;
use crate::events::JobEvent;
use crate::messages::StatusResponse;

type StatusCheck = Pin<Box<dyn Future<Output = Result<StatusResponse, ApiError>> + Send>>;

/// Poll `job_id` until it reaches a terminal phase or `cancel` fires.
///
/// `state` must already hold the job in `pending`. Returns the final
/// snapshot.
pub async fn run_poll_loop(
    api: Arc<dyn GenerationApi>,
    job_id: JobId,
    config: &PollConfig,
    state: &watch::Sender<Job>,
    event_tx: &broadcast::Sender<JobEvent>,
    cancel: &CancellationToken,
) -> Job {
    let mut ticker = tokio::time::interval_at(Instant::now() + config.interval, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut in_flight: Option<StatusCheck> = None;
    let mut consecutive_failures = 0u32;
    let mut retry_at: Option<Instant> = None;

    tracing::debug!(
        job_id = %job_id,
        interval_ms = config.interval.as_millis() as u64,
        "Poll loop started",
    );

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                if in_flight.take().is_some() {
                    tracing::debug!(job_id = %job_id, "Discarding in-flight status check");
                }
                publish(state, event_tx, &job_id, |job| job.fail(JobError::cancelled()));
                tracing::info!(job_id = %job_id, "Poll loop cancelled");
                break;
            }

            result = await_check(&mut in_flight), if in_flight.is_some() => {
                in_flight = None;
                match result {
                    Ok(response) => {
                        consecutive_failures = 0;
                        retry_at = None;
                        tracing::debug!(job_id = %job_id, status = %response.status, "Status check returned");
                        publish(state, event_tx, &job_id, |job| job.apply(response.into_update()));
                        if state.borrow().phase.is_terminal() {
                            break;
                        }
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        if consecutive_failures >= config.max_consecutive_failures {
                            tracing::error!(
                                job_id = %job_id,
                                consecutive_failures,
                                error = %e,
                                "Remote unreachable, giving up on job",
                            );
                            let error = JobError::new(
                                ErrorKind::Unreachable,
                                format!("{consecutive_failures} consecutive status checks failed: {e}"),
                            );
                            publish(state, event_tx, &job_id, |job| job.fail(error));
                            break;
                        }
                        let delay = delay_after(consecutive_failures, &config.backoff);
                        tracing::warn!(
                            job_id = %job_id,
                            consecutive_failures,
                            retry_in_ms = delay.as_millis() as u64,
                            error = %e,
                            "Status check failed",
                        );
                        retry_at = Some(Instant::now() + delay);
                    }
                }
            }

            _ = ticker.tick() => {
                if in_flight.is_some() {
                    tracing::debug!(job_id = %job_id, "Previous status check still in flight, skipping tick");
                    continue;
                }
                if retry_at.is_some_and(|at| Instant::now() < at) {
                    tracing::trace!(job_id = %job_id, "Backing off, skipping tick");
                    continue;
                }
                let api = Arc::clone(&api);
                let id = job_id.clone();
                in_flight = Some(Box::pin(async move { api.get_job_status(&id).await }));
            }
        }
    }

    let final_state = state.borrow().clone();
    tracing::debug!(job_id = %job_id, phase = final_state.phase.as_str(), "Poll loop exited");
    final_state
}

async fn await_check(slot: &mut Option<StatusCheck>) -> Result<StatusResponse, ApiError> {
    match slot.as_mut() {
        Some(check) => check.await,
        None => std::future::pending().await,
    }
}

/// Apply a mutation to the shared snapshot and broadcast the result if
/// anything observable changed.
fn publish<F>(
    state: &watch::Sender<Job>,
    event_tx: &broadcast::Sender<JobEvent>,
    job_id: &JobId,
    mutate: F,
) -> Applied
where
    F: FnOnce(&mut Job) -> Applied,
{
    let mut outcome = Applied::Unchanged;
    state.send_if_modified(|job| {
        outcome = mutate(job);
        outcome.changed()
    });

    match outcome {
        Applied::Advanced | Applied::Refreshed => {
            let event = JobEvent::for_snapshot(job_id, &state.borrow());
            if outcome == Applied::Advanced {
                let job = state.borrow();
                tracing::info!(
                    job_id = %job_id,
                    phase = job.phase.as_str(),
                    status = job.status_text.as_deref().unwrap_or(""),
                    "Job advanced",
                );
            }
            // No receivers only means nobody is listening.
            let _ = event_tx.send(event);
        }
        Applied::Discarded => {
            tracing::debug!(job_id = %job_id, "Discarded update that would regress the job");
        }
        Applied::Unchanged => {}
    }
    outcome
}

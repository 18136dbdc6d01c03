#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pixio_client::api::{ApiError, GenerationApi};
use pixio_client::config::PollConfig;
use pixio_client::launcher::JobLauncher;
use pixio_client::messages::StatusResponse;
use pixio_client::tracker::JobTracker;
use pixio_core::credits::CreditLedger;
use pixio_core::types::JobId;
use pixio_core::upload::UploadTicket;

pub const TICKET_UPLOAD_URL: &str = "https://bucket.example.com/put/abc?sig=1";
pub const TICKET_DOWNLOAD_URL: &str = "https://bucket.example.com/abc.png";
pub const OUTPUT_URL: &str = "https://cdn.example.com/outputs/result.png";

/// One scripted answer to a status check.
#[derive(Debug, Clone)]
pub struct Step {
    pub delay: Duration,
    pub outcome: Result<&'static str, u16>,
}

pub fn status(s: &'static str) -> Step {
    Step {
        delay: Duration::ZERO,
        outcome: Ok(s),
    }
}

pub fn http_error(code: u16) -> Step {
    Step {
        delay: Duration::ZERO,
        outcome: Err(code),
    }
}

pub fn delayed(delay: Duration, step: Step) -> Step {
    Step { delay, ..step }
}

/// Scripted in-memory [`GenerationApi`].
///
/// Every call is appended to `calls` as `"<operation>[:<arg>]"`. Status
/// scripts are per job id; the last step repeats once a script runs dry,
/// and unscripted ids stay `processing`.
#[derive(Default)]
pub struct FakeApi {
    pub calls: Mutex<Vec<String>>,
    submit_results: Mutex<VecDeque<Result<(), u16>>>,
    submit_delay: Mutex<Duration>,
    submit_delays: Mutex<VecDeque<Duration>>,
    next_id: AtomicUsize,
    status_scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    status_calls: AtomicUsize,
    pub ticket_requests: Mutex<Vec<(String, u64)>>,
    pub transfers: Mutex<Vec<(String, String, usize)>>,
    ticket_error: Mutex<Option<u16>>,
    transfer_error: Mutex<Option<u16>>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Outcomes for the next submissions, in order. Unscripted ones succeed.
    pub fn script_submissions(&self, outcomes: Vec<Result<(), u16>>) {
        self.submit_results.lock().unwrap().extend(outcomes);
    }

    pub fn set_submit_delay(&self, delay: Duration) {
        *self.submit_delay.lock().unwrap() = delay;
    }

    /// Latency of the next submissions, in order. Later ones use the
    /// shared submit delay.
    pub fn script_submission_delays(&self, delays: Vec<Duration>) {
        self.submit_delays.lock().unwrap().extend(delays);
    }

    pub fn script_status(&self, job_id: &str, steps: Vec<Step>) {
        self.status_scripts
            .lock()
            .unwrap()
            .insert(job_id.to_string(), steps.into());
    }

    pub fn fail_ticket(&self, code: u16) {
        *self.ticket_error.lock().unwrap() = Some(code);
    }

    pub fn fail_transfer(&self, code: u16) {
        *self.transfer_error.lock().unwrap() = Some(code);
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    async fn next_submission(&self) -> Result<JobId, ApiError> {
        let scripted = self.submit_delays.lock().unwrap().pop_front();
        let delay = scripted.unwrap_or_else(|| *self.submit_delay.lock().unwrap());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let outcome = self.submit_results.lock().unwrap().pop_front().unwrap_or(Ok(()));
        match outcome {
            Ok(()) => {
                let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(JobId::new(format!("run-{n}")).unwrap())
            }
            Err(code) => Err(rejected(code)),
        }
    }
}

fn rejected(code: u16) -> ApiError {
    ApiError::Status {
        status: code,
        body: "scripted failure".into(),
    }
}

#[async_trait]
impl GenerationApi for FakeApi {
    async fn submit_text_job(
        &self,
        positive_prompt: &str,
        negative_prompt: &str,
    ) -> Result<JobId, ApiError> {
        self.record(format!("submit_text_job:{positive_prompt}|{negative_prompt}"));
        self.next_submission().await
    }

    async fn submit_image_job(&self, source_image_url: &str) -> Result<JobId, ApiError> {
        self.record(format!("submit_image_job:{source_image_url}"));
        self.next_submission().await
    }

    async fn submit_pose_job(&self, pose_url: &str, prompt: &str) -> Result<JobId, ApiError> {
        self.record(format!("submit_pose_job:{pose_url}|{prompt}"));
        self.next_submission().await
    }

    async fn get_upload_ticket(
        &self,
        content_type: &str,
        byte_size: u64,
    ) -> Result<UploadTicket, ApiError> {
        self.record("get_upload_ticket".into());
        self.ticket_requests
            .lock()
            .unwrap()
            .push((content_type.to_string(), byte_size));
        if let Some(code) = *self.ticket_error.lock().unwrap() {
            return Err(rejected(code));
        }
        Ok(UploadTicket {
            upload_url: TICKET_UPLOAD_URL.into(),
            download_url: TICKET_DOWNLOAD_URL.into(),
        })
    }

    async fn transfer_upload(
        &self,
        ticket: &UploadTicket,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<(), ApiError> {
        self.record("transfer_upload".into());
        self.transfers.lock().unwrap().push((
            ticket.upload_url.clone(),
            content_type.to_string(),
            body.len(),
        ));
        match *self.transfer_error.lock().unwrap() {
            Some(code) => Err(rejected(code)),
            None => Ok(()),
        }
    }

    async fn get_job_status(&self, job_id: &JobId) -> Result<StatusResponse, ApiError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.record(format!("get_job_status:{job_id}"));

        let step = {
            let mut scripts = self.status_scripts.lock().unwrap();
            match scripts.get_mut(job_id.as_str()) {
                Some(script) if script.len() > 1 => script.pop_front(),
                Some(script) => script.front().cloned(),
                None => None,
            }
        }
        .unwrap_or_else(|| status("processing"));

        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }

        match step.outcome {
            Ok(s) => {
                let outputs = if s == "success" {
                    serde_json::json!([{"data": {"images": [{"url": OUTPUT_URL}]}}])
                } else {
                    serde_json::json!([])
                };
                Ok(StatusResponse {
                    status: s.to_string(),
                    outputs: serde_json::from_value(outputs).unwrap(),
                })
            }
            Err(code) => Err(rejected(code)),
        }
    }

    async fn fetch_artifact(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        self.record(format!("fetch_artifact:{url}"));
        if url == OUTPUT_URL {
            Ok(b"\x89PNG fake image".to_vec())
        } else {
            Err(rejected(404))
        }
    }
}

/// Launcher wired to `api` with the default 2 s poll interval.
pub fn launcher(api: &Arc<FakeApi>, credits: u64) -> JobLauncher {
    let api: Arc<dyn GenerationApi> = Arc::clone(api) as Arc<dyn GenerationApi>;
    let tracker = JobTracker::new(Arc::clone(&api), PollConfig::default());
    JobLauncher::new(api, tracker, CreditLedger::new(credits))
}

pub fn tracker(api: &Arc<FakeApi>) -> Arc<JobTracker> {
    JobTracker::new(Arc::clone(api) as Arc<dyn GenerationApi>, PollConfig::default())
}

//! Video job polling: terminal states, attempt ceiling, cancellation and
//! artifact retrieval, driven by a scripted provider on paused time.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use genstudio::error::GenError;
use genstudio::job::{GenerationArtifact, Job, JobStatus, VideoGenerationRequest};
use genstudio::orchestrate::Publisher;
use genstudio::orchestrate::poll::{
    MSG_CANCELLED, MSG_TIMED_OUT, PollPolicy, PollState, PollingOrchestrator, VideoUpdate,
};
use genstudio::provider::{ArtifactSource, VideoApi};

/// One scripted answer to a status call.
#[derive(Clone)]
enum Step {
    Status(&'static str),
    Body(&'static str),
    HttpError(u16, &'static str),
}

fn job_json(id: &str, status: &str) -> Vec<u8> {
    format!(r#"{{"id": "{id}", "status": "{status}", "object": "video.generation.job"}}"#)
        .into_bytes()
}

fn respond(step: &Step) -> Result<Job, GenError> {
    match step {
        Step::Status(status) => Job::from_slice(&job_json("job-1", status)),
        Step::Body(body) => Job::from_slice(body.as_bytes()),
        Step::HttpError(status, body) => Err(GenError::provider(*status, *body)),
    }
}

struct MockProvider {
    create: Step,
    polls: Mutex<VecDeque<Step>>,
    /// Answer once the script runs out.
    fallback: Step,
    poll_delay: Duration,
    fetch_error: Option<u16>,
    cancel_on_create: Option<CancellationToken>,
    create_calls: AtomicU32,
    poll_calls: AtomicU32,
    fetched: Mutex<Vec<String>>,
}

impl MockProvider {
    fn new(polls: Vec<Step>, fallback: Step) -> Self {
        Self {
            create: Step::Status("queued"),
            polls: Mutex::new(polls.into()),
            fallback,
            poll_delay: Duration::ZERO,
            fetch_error: None,
            cancel_on_create: None,
            create_calls: AtomicU32::new(0),
            poll_calls: AtomicU32::new(0),
            fetched: Mutex::new(Vec::new()),
        }
    }

    fn polls(&self) -> u32 {
        self.poll_calls.load(Ordering::SeqCst)
    }

    fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl VideoApi for MockProvider {
    async fn create_job(&self, _request: &VideoGenerationRequest) -> Result<Job, GenError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = &self.cancel_on_create {
            token.cancel();
        }
        respond(&self.create)
    }

    async fn get_job_status(&self, job_id: &str) -> Result<Job, GenError> {
        assert_eq!(job_id, "job-1");
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        if !self.poll_delay.is_zero() {
            tokio::time::sleep(self.poll_delay).await;
        }
        let step = self
            .polls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        respond(&step)
    }
}

#[async_trait]
impl ArtifactSource for MockProvider {
    async fn fetch_artifact(&self, artifact: &GenerationArtifact) -> Result<Vec<u8>, GenError> {
        self.fetched.lock().unwrap().push(artifact.id.clone());
        match self.fetch_error {
            Some(status) => Err(GenError::provider(status, "content unavailable")),
            None => Ok(b"\x00\x00\x00\x18ftypmp42".to_vec()),
        }
    }
}

fn cat_request() -> VideoGenerationRequest {
    VideoGenerationRequest::new("a cat", 720, 1280, 4, "sora").unwrap()
}

fn drain(rx: &mut UnboundedReceiver<VideoUpdate>) -> Vec<VideoUpdate> {
    let mut updates = Vec::new();
    while let Ok(update) = rx.try_recv() {
        updates.push(update);
    }
    updates
}

fn finished_count(updates: &[VideoUpdate]) -> usize {
    updates
        .iter()
        .filter(|u| matches!(u, VideoUpdate::Finished { .. }))
        .count()
}

fn progress_values(updates: &[VideoUpdate]) -> Vec<(JobStatus, u8)> {
    updates
        .iter()
        .filter_map(|u| match u {
            VideoUpdate::Progress {
                status, progress, ..
            } => Some((*status, *progress)),
            _ => None,
        })
        .collect()
}

const SUCCEEDED_WITH_GENERATION: &str =
    r#"{"id": "job-1", "status": "succeeded", "generations": [{"id": "gen-1", "width": 720, "height": 1280}]}"#;

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn cat_video_succeeds_and_downloads() {
    let api = Arc::new(MockProvider::new(
        vec![
            Step::Status("queued"),
            Step::Status("running"),
            Step::Status("running"),
            Step::Body(SUCCEEDED_WITH_GENERATION),
        ],
        Step::Status("running"),
    ));
    let mut orchestrator = PollingOrchestrator::new(api.clone(), PollPolicy::default());
    let (updates, mut rx) = Publisher::channel();
    let token = CancellationToken::new();

    let outcome = orchestrator.run(&cat_request(), &token, &updates).await;

    assert_eq!(outcome.state, PollState::Succeeded);
    assert_eq!(outcome.message, "Video generation completed! Downloaded 1 video(s)");
    assert!(outcome.retrieval_warning.is_none());
    assert_eq!(outcome.attempts, 4);
    assert_eq!(outcome.downloaded(), 1);
    assert_eq!(api.fetched(), vec!["gen-1".to_string()]);
    assert_eq!(orchestrator.state(), PollState::Succeeded);

    let updates = drain(&mut rx);
    assert_eq!(finished_count(&updates), 1);
    assert!(matches!(updates.last(), Some(VideoUpdate::Finished { state: PollState::Succeeded, .. })));

    let progress = progress_values(&updates);
    assert_eq!(progress.len(), 4);
    assert!(progress.windows(2).all(|w| w[0].1 <= w[1].1), "{progress:?}");
    for (status, value) in &progress {
        match status {
            JobStatus::Running => assert!((20..90).contains(value), "{value}"),
            JobStatus::Pending => assert!(*value <= 10),
            JobStatus::Succeeded => assert_eq!(*value, 100),
            other => panic!("unexpected status {other}"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn polls_are_spaced_by_interval() {
    let api = Arc::new(MockProvider::new(
        vec![Step::Status("running"), Step::Status("running")],
        Step::Body(SUCCEEDED_WITH_GENERATION),
    ));
    let mut orchestrator = PollingOrchestrator::new(api.clone(), PollPolicy::default());
    let start = tokio::time::Instant::now();

    let outcome = orchestrator
        .run(&cat_request(), &CancellationToken::new(), &Publisher::none())
        .await;

    assert!(outcome.is_success());
    assert_eq!(api.polls(), 3);
    // two waits between three polls
    assert_eq!(start.elapsed(), Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn missing_generations_list_is_synthesized_from_job_id() {
    let api = Arc::new(MockProvider::new(vec![], Step::Status("succeeded")));
    let mut orchestrator = PollingOrchestrator::new(api.clone(), PollPolicy::default());

    let outcome = orchestrator
        .run(&cat_request(), &CancellationToken::new(), &Publisher::none())
        .await;

    assert!(outcome.is_success());
    assert_eq!(api.fetched(), vec!["job-1".to_string()]);
    assert_eq!(outcome.artifacts[0].format, "mp4");
}

#[tokio::test(start_paused = true)]
async fn unknown_status_keeps_polling() {
    let api = Arc::new(MockProvider::new(
        vec![Step::Status("rendering_frames"), Step::Status("Rendering_Frames")],
        Step::Body(SUCCEEDED_WITH_GENERATION),
    ));
    let mut orchestrator = PollingOrchestrator::new(api.clone(), PollPolicy::default());
    let (updates, mut rx) = Publisher::channel();

    let outcome = orchestrator
        .run(&cat_request(), &CancellationToken::new(), &updates)
        .await;

    assert_eq!(outcome.state, PollState::Succeeded);
    assert_eq!(api.polls(), 3);
    let updates = drain(&mut rx);
    let raw: Vec<(JobStatus, String)> = updates
        .iter()
        .filter_map(|u| match u {
            VideoUpdate::Progress {
                status, raw_status, ..
            } => Some((*status, raw_status.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(raw[0], (JobStatus::Running, "rendering_frames".to_string()));
    assert_eq!(raw[1], (JobStatus::Running, "Rendering_Frames".to_string()));
}

// ---------------------------------------------------------------------------
// Terminal failures
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn ceiling_times_out_after_exactly_max_attempts() {
    let api = Arc::new(MockProvider::new(vec![], Step::Status("running")));
    let mut orchestrator = PollingOrchestrator::new(api.clone(), PollPolicy::default());
    let (updates, mut rx) = Publisher::channel();
    let start = tokio::time::Instant::now();

    let outcome = orchestrator
        .run(&cat_request(), &CancellationToken::new(), &updates)
        .await;

    assert_eq!(outcome.state, PollState::TimedOut);
    assert_eq!(outcome.message, MSG_TIMED_OUT);
    assert!(matches!(outcome.error, Some(GenError::Timeout { attempts: 120 })));
    assert_eq!(outcome.attempts, 120);
    assert_eq!(api.polls(), 120);
    assert!(api.fetched().is_empty());
    assert_eq!(start.elapsed(), Duration::from_secs(119 * 5));

    let updates = drain(&mut rx);
    assert_eq!(finished_count(&updates), 1);
    let progress = progress_values(&updates);
    assert!(progress.iter().all(|(_, p)| *p <= 90));
    assert!(progress.windows(2).all(|w| w[0].1 <= w[1].1));
}

#[tokio::test(start_paused = true)]
async fn small_ceiling_is_honored() {
    let api = Arc::new(MockProvider::new(vec![], Step::Status("pending")));
    let policy = PollPolicy {
        interval: Duration::from_secs(1),
        max_attempts: 3,
        poll_retries: 0,
    };
    let mut orchestrator = PollingOrchestrator::new(api.clone(), policy);

    let outcome = orchestrator
        .run(&cat_request(), &CancellationToken::new(), &Publisher::none())
        .await;

    assert_eq!(outcome.state, PollState::TimedOut);
    assert_eq!(api.polls(), 3);
}

#[tokio::test(start_paused = true)]
async fn provider_failure_surfaces_job_error_message() {
    let api = Arc::new(MockProvider::new(
        vec![
            Step::Status("running"),
            Step::Body(
                r#"{"id": "job-1", "status": "failed", "error": {"code": "moderation_blocked", "message": "Prompt was rejected by moderation."}}"#,
            ),
        ],
        Step::Status("running"),
    ));
    let mut orchestrator = PollingOrchestrator::new(api.clone(), PollPolicy::default());

    let outcome = orchestrator
        .run(&cat_request(), &CancellationToken::new(), &Publisher::none())
        .await;

    assert_eq!(outcome.state, PollState::Failed);
    assert_eq!(outcome.message, "Prompt was rejected by moderation.");
    assert_eq!(api.polls(), 2);
    assert!(api.fetched().is_empty());
    assert_eq!(outcome.job.unwrap().status(), JobStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn failed_job_with_null_fields_keeps_provider_reason() {
    let api = Arc::new(MockProvider::new(
        vec![
            Step::Body(r#"{"id": "job-1", "status": "running", "progress": null}"#),
            Step::Body(
                r#"{"id": "job-1", "status": "failed", "progress": null, "error": {"code": null, "message": "content filtered"}}"#,
            ),
        ],
        Step::Status("running"),
    ));
    let mut orchestrator = PollingOrchestrator::new(api.clone(), PollPolicy::default());
    let (updates, mut rx) = Publisher::channel();

    let outcome = orchestrator
        .run(&cat_request(), &CancellationToken::new(), &updates)
        .await;

    assert_eq!(outcome.state, PollState::Failed);
    assert_eq!(outcome.message, "content filtered");
    assert!(outcome.error.is_none());
    assert_eq!(api.polls(), 2);
    let progress = progress_values(&drain(&mut rx));
    assert_eq!(progress[0], (JobStatus::Running, 20));
}

#[tokio::test(start_paused = true)]
async fn provider_failure_without_message_uses_generic_text() {
    let api = Arc::new(MockProvider::new(vec![], Step::Status("failed")));
    let mut orchestrator = PollingOrchestrator::new(api, PollPolicy::default());

    let outcome = orchestrator
        .run(&cat_request(), &CancellationToken::new(), &Publisher::none())
        .await;

    assert_eq!(outcome.state, PollState::Failed);
    assert_eq!(outcome.message, "Video generation failed.");
}

#[tokio::test(start_paused = true)]
async fn provider_side_cancel_skips_retrieval() {
    let api = Arc::new(MockProvider::new(vec![], Step::Status("canceled")));
    let mut orchestrator = PollingOrchestrator::new(api.clone(), PollPolicy::default());

    let outcome = orchestrator
        .run(&cat_request(), &CancellationToken::new(), &Publisher::none())
        .await;

    assert_eq!(outcome.state, PollState::Cancelled);
    assert_eq!(outcome.message, MSG_CANCELLED);
    assert!(api.fetched().is_empty());
}

#[tokio::test(start_paused = true)]
async fn create_failure_reports_provider_message() {
    let mut mock = MockProvider::new(vec![], Step::Status("running"));
    mock.create = Step::HttpError(
        400,
        r#"{"error": {"code": "invalid_size", "message": "Unsupported resolution."}}"#,
    );
    let api = Arc::new(mock);
    let mut orchestrator = PollingOrchestrator::new(api.clone(), PollPolicy::default());
    let (updates, mut rx) = Publisher::channel();

    let outcome = orchestrator
        .run(&cat_request(), &CancellationToken::new(), &updates)
        .await;

    assert_eq!(outcome.state, PollState::Failed);
    assert_eq!(
        outcome.message,
        "Error generating video: HTTP 400: Unsupported resolution."
    );
    assert!(outcome.job.is_none());
    assert_eq!(api.polls(), 0);
    assert_eq!(finished_count(&drain(&mut rx)), 1);
}

#[tokio::test(start_paused = true)]
async fn poll_error_fails_by_default() {
    let api = Arc::new(MockProvider::new(
        vec![Step::Status("running"), Step::HttpError(503, "upstream busy")],
        Step::Status("succeeded"),
    ));
    let mut orchestrator = PollingOrchestrator::new(api.clone(), PollPolicy::default());

    let outcome = orchestrator
        .run(&cat_request(), &CancellationToken::new(), &Publisher::none())
        .await;

    assert_eq!(outcome.state, PollState::Failed);
    assert_eq!(
        outcome.message,
        "Error checking job status: HTTP 503 - upstream busy"
    );
    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.error.as_ref().and_then(GenError::status), Some(503));
}

#[tokio::test(start_paused = true)]
async fn poll_retries_consume_attempts() {
    let api = Arc::new(MockProvider::new(
        vec![
            Step::HttpError(500, "oops"),
            Step::HttpError(500, "oops"),
            Step::Body(SUCCEEDED_WITH_GENERATION),
        ],
        Step::Status("running"),
    ));
    let policy = PollPolicy {
        poll_retries: 2,
        ..PollPolicy::default()
    };
    let mut orchestrator = PollingOrchestrator::new(api.clone(), policy);

    let outcome = orchestrator
        .run(&cat_request(), &CancellationToken::new(), &Publisher::none())
        .await;

    assert_eq!(outcome.state, PollState::Succeeded);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(api.polls(), 3);
}

#[tokio::test(start_paused = true)]
async fn auth_error_is_not_retried() {
    let api = Arc::new(MockProvider::new(
        vec![],
        Step::HttpError(401, r#"{"error": {"code": "401", "message": "Access denied."}}"#),
    ));
    let policy = PollPolicy {
        poll_retries: 5,
        ..PollPolicy::default()
    };
    let mut orchestrator = PollingOrchestrator::new(api.clone(), policy);
    let start = tokio::time::Instant::now();

    let outcome = orchestrator
        .run(&cat_request(), &CancellationToken::new(), &Publisher::none())
        .await;

    assert_eq!(outcome.state, PollState::Failed);
    assert_eq!(outcome.message, "Error checking job status: HTTP 401: Access denied.");
    assert_eq!(api.polls(), 1);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn unparseable_poll_body_is_not_retried() {
    let api = Arc::new(MockProvider::new(vec![], Step::Body("<html>gateway</html>")));
    let policy = PollPolicy {
        poll_retries: 5,
        ..PollPolicy::default()
    };
    let mut orchestrator = PollingOrchestrator::new(api.clone(), policy);

    let outcome = orchestrator
        .run(&cat_request(), &CancellationToken::new(), &Publisher::none())
        .await;

    assert_eq!(outcome.state, PollState::Failed);
    assert!(matches!(outcome.error, Some(GenError::SchemaParse(_))));
    assert_eq!(api.polls(), 1);
}

#[tokio::test(start_paused = true)]
async fn service_unavailable_is_retried() {
    let api = Arc::new(MockProvider::new(
        vec![Step::HttpError(503, "upstream busy"), Step::HttpError(429, "slow down")],
        Step::Body(SUCCEEDED_WITH_GENERATION),
    ));
    let policy = PollPolicy {
        poll_retries: 5,
        ..PollPolicy::default()
    };
    let mut orchestrator = PollingOrchestrator::new(api.clone(), policy);

    let outcome = orchestrator
        .run(&cat_request(), &CancellationToken::new(), &Publisher::none())
        .await;

    assert_eq!(outcome.state, PollState::Succeeded);
    assert_eq!(api.polls(), 3);
}

#[tokio::test(start_paused = true)]
async fn retries_never_exceed_ceiling() {
    let api = Arc::new(MockProvider::new(vec![], Step::HttpError(500, "down")));
    let policy = PollPolicy {
        interval: Duration::from_secs(5),
        max_attempts: 4,
        poll_retries: 10,
    };
    let mut orchestrator = PollingOrchestrator::new(api.clone(), policy);

    let outcome = orchestrator
        .run(&cat_request(), &CancellationToken::new(), &Publisher::none())
        .await;

    assert_eq!(outcome.state, PollState::TimedOut);
    assert_eq!(api.polls(), 4);
}

#[tokio::test(start_paused = true)]
async fn retrieval_failure_keeps_success() {
    let mut mock = MockProvider::new(vec![], Step::Body(SUCCEEDED_WITH_GENERATION));
    mock.fetch_error = Some(500);
    let api = Arc::new(mock);
    let mut orchestrator = PollingOrchestrator::new(api.clone(), PollPolicy::default());

    let outcome = orchestrator
        .run(&cat_request(), &CancellationToken::new(), &Publisher::none())
        .await;

    assert_eq!(outcome.state, PollState::Succeeded);
    assert_eq!(
        outcome.message,
        "Video generation completed successfully! Generated 1 video(s)."
    );
    let warning = outcome.retrieval_warning.as_deref().unwrap();
    assert!(warning.starts_with("Error retrieving video content: HTTP 500"), "{warning}");
    assert_eq!(outcome.downloaded(), 0);
    assert_eq!(outcome.job.unwrap().status(), JobStatus::Succeeded);
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn cancel_before_first_poll_makes_no_status_call() {
    let token = CancellationToken::new();
    let mut mock = MockProvider::new(vec![], Step::Status("running"));
    mock.cancel_on_create = Some(token.clone());
    let api = Arc::new(mock);
    let mut orchestrator = PollingOrchestrator::new(api.clone(), PollPolicy::default());
    let (updates, mut rx) = Publisher::channel();

    let outcome = orchestrator.run(&cat_request(), &token, &updates).await;

    assert_eq!(outcome.state, PollState::Cancelled);
    assert_eq!(outcome.message, MSG_CANCELLED);
    assert_eq!(api.polls(), 0);
    assert!(api.fetched().is_empty());
    assert_eq!(finished_count(&drain(&mut rx)), 1);
}

#[tokio::test(start_paused = true)]
async fn already_cancelled_token_skips_submission() {
    let token = CancellationToken::new();
    token.cancel();
    let api = Arc::new(MockProvider::new(vec![], Step::Status("running")));
    let mut orchestrator = PollingOrchestrator::new(api.clone(), PollPolicy::default());

    let outcome = orchestrator
        .run(&cat_request(), &token, &Publisher::none())
        .await;

    assert_eq!(outcome.state, PollState::Cancelled);
    assert_eq!(api.create_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn abort_during_status_call_discards_response() {
    let mut mock = MockProvider::new(vec![], Step::Status("succeeded"));
    mock.poll_delay = Duration::from_secs(10);
    let api = Arc::new(mock);
    let mut orchestrator = PollingOrchestrator::new(api.clone(), PollPolicy::default());
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(7)).await;
        trigger.cancel();
    });

    let outcome = orchestrator
        .run(&cat_request(), &token, &Publisher::none())
        .await;

    assert_eq!(outcome.state, PollState::Cancelled);
    assert_eq!(api.polls(), 1);
    assert!(api.fetched().is_empty());
    // the late "succeeded" answer was never applied
    assert_ne!(outcome.job.unwrap().status(), JobStatus::Succeeded);
}

#[tokio::test(start_paused = true)]
async fn abort_during_wait_stops_promptly() {
    let api = Arc::new(MockProvider::new(vec![], Step::Status("running")));
    let mut orchestrator = PollingOrchestrator::new(api.clone(), PollPolicy::default());
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(12_500)).await;
        trigger.cancel();
    });
    let start = tokio::time::Instant::now();

    let outcome = orchestrator
        .run(&cat_request(), &token, &Publisher::none())
        .await;

    assert_eq!(outcome.state, PollState::Cancelled);
    // polls at 0s, 5s, 10s; cancelled during the third wait
    assert_eq!(api.polls(), 3);
    assert_eq!(start.elapsed(), Duration::from_millis(12_500));
}

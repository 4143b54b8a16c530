use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::retrieval::{self, RetrievalReport};
use super::{Publisher, cancellable};
use crate::config::VideoConfig;
use crate::error::GenError;
use crate::job::{GenerationArtifact, Job, JobStatus, VideoGenerationRequest};
use crate::provider::{ArtifactSource, VideoApi};

pub const MSG_CANCELLED: &str = "Video generation was cancelled.";
pub const MSG_FAILED: &str = "Video generation failed.";
pub const MSG_TIMED_OUT: &str = "Video generation timed out. Please try again.";

/// Poll cadence and ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// Total status calls allowed, retries included.
    pub max_attempts: u32,
    /// Consecutive transient poll failures (network, 429, 5xx) tolerated
    /// before the job is failed. Zero fails on the first error; other
    /// errors always fail at once.
    pub poll_retries: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 120,
            poll_retries: 0,
        }
    }
}

impl From<&VideoConfig> for PollPolicy {
    fn from(config: &VideoConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            max_attempts: config.max_poll_attempts.max(1),
            poll_retries: config.poll_retries,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Submitting,
    Polling,
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
}

impl PollState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Cancelled | Self::TimedOut
        )
    }
}

/// Published in order as the job advances.
#[derive(Debug, Clone, PartialEq)]
pub enum VideoUpdate {
    State(PollState),
    Submitted {
        job_id: String,
        status: JobStatus,
    },
    Progress {
        job_id: String,
        status: JobStatus,
        raw_status: String,
        progress: u8,
        attempt: u32,
    },
    Retrieving {
        count: usize,
    },
    /// Exactly one per run.
    Finished {
        state: PollState,
        message: String,
    },
}

#[derive(Debug)]
pub struct VideoOutcome {
    pub state: PollState,
    /// Last observed job; `None` if creation never succeeded.
    pub job: Option<Job>,
    pub artifacts: Vec<GenerationArtifact>,
    /// Primary user-facing message.
    pub message: String,
    pub error: Option<GenError>,
    /// Secondary, non-fatal: artifact download failed after success.
    pub retrieval_warning: Option<String>,
    /// Status calls made.
    pub attempts: u32,
}

impl VideoOutcome {
    pub fn is_success(&self) -> bool {
        self.state == PollState::Succeeded
    }

    /// Artifacts with content attached.
    pub fn downloaded(&self) -> usize {
        self.artifacts.iter().filter(|a| a.bytes.is_some()).count()
    }
}

/// Drives one video job from submission to a terminal state.
pub struct PollingOrchestrator<A: ?Sized> {
    api: Arc<A>,
    policy: PollPolicy,
    state: PollState,
    progress: u8,
}

impl<A> PollingOrchestrator<A>
where
    A: VideoApi + ArtifactSource + ?Sized,
{
    pub fn new(api: Arc<A>, policy: PollPolicy) -> Self {
        Self {
            api,
            policy,
            state: PollState::Idle,
            progress: 0,
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    /// Last published progress, 0-100.
    pub fn progress(&self) -> u8 {
        self.progress
    }

    fn transition(&mut self, next: PollState, updates: &Publisher<VideoUpdate>) {
        tracing::debug!(from = ?self.state, to = ?next, "video job state");
        self.state = next;
        updates.publish(VideoUpdate::State(next));
    }

    /// Submit `request` and poll until success, failure, cancellation or the
    /// attempt ceiling. Never returns an error: every path ends in an outcome.
    pub async fn run(
        &mut self,
        request: &VideoGenerationRequest,
        token: &CancellationToken,
        updates: &Publisher<VideoUpdate>,
    ) -> VideoOutcome {
        self.progress = 0;
        let start = Instant::now();
        let mut outcome = VideoOutcome {
            state: PollState::Idle,
            job: None,
            artifacts: Vec::new(),
            message: String::new(),
            error: None,
            retrieval_warning: None,
            attempts: 0,
        };

        self.transition(PollState::Submitting, updates);
        let job = match cancellable(token, self.api.create_job(request)).await {
            Ok(job) => job,
            Err(e) if e.is_cancelled() => {
                outcome.error = Some(e);
                return self.finish(outcome, PollState::Cancelled, MSG_CANCELLED.into(), updates);
            }
            Err(e) => {
                let message = format!("Error generating video: {}", e.user_message());
                outcome.error = Some(e);
                return self.finish(outcome, PollState::Failed, message, updates);
            }
        };

        tracing::info!(
            job_id = job.id,
            model = request.model,
            status = job.status.raw,
            "video job launched"
        );
        updates.publish(VideoUpdate::Submitted {
            job_id: job.id.clone(),
            status: job.status(),
        });

        let job_id = job.id.clone();
        outcome.job = Some(job);
        self.transition(PollState::Polling, updates);

        let mut attempts: u32 = 0;
        let mut consecutive_failures: u32 = 0;

        loop {
            if let Some(job) = outcome.job.as_ref().filter(|j| j.is_terminal()) {
                let status = job.status();
                outcome.attempts = attempts;
                tracing::info!(
                    job_id = job_id,
                    status = %status,
                    attempts = attempts,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "video job reached terminal status"
                );
                return self.conclude(outcome, status, token, updates).await;
            }

            if attempts >= self.policy.max_attempts {
                tracing::warn!(
                    job_id = job_id,
                    attempts = attempts,
                    "video job poll ceiling reached"
                );
                outcome.attempts = attempts;
                outcome.error = Some(GenError::Timeout { attempts });
                return self.finish(outcome, PollState::TimedOut, MSG_TIMED_OUT.into(), updates);
            }

            if token.is_cancelled() {
                outcome.attempts = attempts;
                outcome.error = Some(GenError::Cancelled);
                return self.finish(outcome, PollState::Cancelled, MSG_CANCELLED.into(), updates);
            }

            let polled = cancellable(token, self.api.get_job_status(&job_id)).await;
            let attempt_index = attempts;
            attempts += 1;

            match polled {
                Ok(fresh) => {
                    consecutive_failures = 0;
                    let Some(job) = outcome.job.as_mut() else {
                        unreachable!("job is set before polling starts");
                    };
                    job.apply_poll(fresh);

                    let mut progress = job.progress(attempt_index, self.policy.max_attempts);
                    if !job.is_terminal() {
                        progress = progress.max(self.progress);
                    }
                    self.progress = progress;

                    tracing::debug!(
                        job_id = job_id,
                        attempt = attempts,
                        status = job.status.raw,
                        progress = progress,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "video job polled"
                    );
                    updates.publish(VideoUpdate::Progress {
                        job_id: job_id.clone(),
                        status: job.status(),
                        raw_status: job.status.raw.clone(),
                        progress,
                        attempt: attempts,
                    });
                    if job.is_terminal() {
                        continue;
                    }
                }
                Err(e) if e.is_cancelled() => {
                    outcome.attempts = attempts;
                    outcome.error = Some(e);
                    let message = MSG_CANCELLED.to_string();
                    return self.finish(outcome, PollState::Cancelled, message, updates);
                }
                Err(e) => {
                    consecutive_failures += 1;
                    tracing::warn!(
                        job_id = job_id,
                        attempt = attempts,
                        failures = consecutive_failures,
                        http_status = e.status(),
                        retryable = e.is_retryable(),
                        "poll request failed: {e}"
                    );
                    // only transient failures are worth another attempt
                    if !e.is_retryable() || consecutive_failures > self.policy.poll_retries {
                        let message = format!("Error checking job status: {}", e.user_message());
                        outcome.attempts = attempts;
                        outcome.error = Some(e);
                        return self.finish(outcome, PollState::Failed, message, updates);
                    }
                }
            }

            if attempts >= self.policy.max_attempts {
                continue;
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::info!(
                        job_id = job_id,
                        attempt = attempts,
                        "video job cancelled while waiting"
                    );
                    outcome.attempts = attempts;
                    outcome.error = Some(GenError::Cancelled);
                    let message = MSG_CANCELLED.to_string();
                    return self.finish(outcome, PollState::Cancelled, message, updates);
                }
                _ = tokio::time::sleep(self.policy.interval) => {}
            }
        }
    }

    /// Map a terminal job status onto the outcome; success triggers retrieval.
    async fn conclude(
        &mut self,
        mut outcome: VideoOutcome,
        status: JobStatus,
        token: &CancellationToken,
        updates: &Publisher<VideoUpdate>,
    ) -> VideoOutcome {
        match status {
            JobStatus::Succeeded => {
                let artifacts = outcome
                    .job
                    .as_ref()
                    .map(Job::artifacts)
                    .unwrap_or_default();
                updates.publish(VideoUpdate::Retrieving {
                    count: artifacts.len(),
                });
                let report = retrieval::retrieve(&*self.api, artifacts, token).await;
                let message = success_message(&report);
                outcome.retrieval_warning = retrieval_warning(&report);
                outcome.artifacts = report.artifacts;
                self.finish(outcome, PollState::Succeeded, message, updates)
            }
            JobStatus::Failed => {
                let message = outcome
                    .job
                    .as_ref()
                    .and_then(|j| j.error.as_ref())
                    .map(|e| e.message.trim())
                    .filter(|m| !m.is_empty())
                    .unwrap_or(MSG_FAILED)
                    .to_string();
                self.finish(outcome, PollState::Failed, message, updates)
            }
            JobStatus::Cancelled => {
                self.finish(outcome, PollState::Cancelled, MSG_CANCELLED.into(), updates)
            }
            JobStatus::Pending | JobStatus::Running => {
                unreachable!("conclude is only called for terminal statuses")
            }
        }
    }

    fn finish(
        &mut self,
        mut outcome: VideoOutcome,
        state: PollState,
        message: String,
        updates: &Publisher<VideoUpdate>,
    ) -> VideoOutcome {
        debug_assert!(state.is_terminal(), "finish called with {state:?}");
        self.transition(state, updates);
        updates.publish(VideoUpdate::Finished {
            state,
            message: message.clone(),
        });
        outcome.state = state;
        outcome.message = message;
        outcome
    }
}

fn success_message(report: &RetrievalReport) -> String {
    if report.is_complete() {
        format!(
            "Video generation completed! Downloaded {} video(s)",
            report.downloaded()
        )
    } else {
        format!(
            "Video generation completed successfully! Generated {} video(s).",
            report.artifacts.len()
        )
    }
}

fn retrieval_warning(report: &RetrievalReport) -> Option<String> {
    report.error.as_ref().map(|e| {
        if e.is_cancelled() {
            "Video download was cancelled.".to_string()
        } else {
            format!("Error retrieving video content: {}", e.user_message())
        }
    })
}

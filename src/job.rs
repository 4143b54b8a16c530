//! Video job data model and provider status normalization.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::GenError;

/// Video durations the provider accepts, in seconds.
pub const SUPPORTED_SECONDS: &[u32] = &[4, 8, 12];

/// Frame sizes the provider accepts, as `(width, height)`.
pub const SUPPORTED_SIZES: &[(u32, u32)] = &[
    (1920, 1080),
    (1080, 1920),
    (1280, 720),
    (720, 1280),
    (1024, 1024),
    (480, 480),
];

/// Canonical job status, independent of provider wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Map a provider status string onto the canonical vocabulary.
    ///
    /// Unrecognized values map to `Running` so that a provider adding a new
    /// in-flight state never terminates a poll loop.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "succeeded" | "completed" | "success" => Self::Succeeded,
            "failed" | "failure" | "error" => Self::Failed,
            "cancelled" | "canceled" => Self::Cancelled,
            "pending" | "queued" | "preprocessing" | "not_started" => Self::Pending,
            "running" | "in_progress" | "processing" => Self::Running,
            other => {
                tracing::debug!(status = other, "unrecognized job status, treating as running");
                Self::Running
            }
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider status string paired with its canonical value.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub struct StatusWord {
    pub canonical: JobStatus,
    pub raw: String,
}

impl From<String> for StatusWord {
    fn from(raw: String) -> Self {
        Self {
            canonical: JobStatus::normalize(&raw),
            raw,
        }
    }
}

impl From<&str> for StatusWord {
    fn from(raw: &str) -> Self {
        Self::from(raw.to_string())
    }
}

/// Estimate progress from elapsed poll attempts when the provider reports none.
///
/// Monotonic in `attempts` for a fixed `max_attempts`.
pub fn estimate_progress(status: JobStatus, attempts: u32, max_attempts: u32) -> u8 {
    let max_attempts = max_attempts.max(1);
    let value = match status {
        JobStatus::Pending => attempts.saturating_mul(5).min(10),
        JobStatus::Running => (20 + attempts.saturating_mul(60) / max_attempts).min(90),
        JobStatus::Succeeded => 100,
        JobStatus::Failed | JobStatus::Cancelled => 0,
    };
    value as u8
}

/// Structured job error reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JobError {
    #[serde(default, deserialize_with = "lenient_string")]
    pub code: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub message: String,
}

/// Where an artifact's bytes are served from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Authenticated provider content endpoint, addressed by generation id.
    #[default]
    Video,
    /// Pre-signed URL returned by an image call; fetched without credentials.
    Image,
}

/// A generated binary result associated with a completed job.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationArtifact {
    pub id: String,
    #[serde(skip)]
    pub kind: ArtifactKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub duration: f64,
    #[serde(default, deserialize_with = "lenient_string")]
    pub resolution: String,
    #[serde(default = "default_format", deserialize_with = "format_or_default")]
    pub format: String,
    /// Attached once by the retrieval stage.
    #[serde(skip)]
    pub bytes: Option<Vec<u8>>,
}

fn default_format() -> String {
    "mp4".to_string()
}

impl GenerationArtifact {
    /// Placeholder generation for providers that omit the `generations` list
    /// and serve content under the job id itself.
    pub fn synthesized(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            kind: ArtifactKind::Video,
            url: None,
            thumbnail_url: None,
            duration: job.seconds.as_deref().and_then(|s| s.parse().ok()).unwrap_or(0.0),
            resolution: job.size.clone().unwrap_or_default(),
            format: default_format(),
            bytes: None,
        }
    }

    /// Direct image result: the URL (or inline bytes) is the artifact.
    pub fn image(id: impl Into<String>, url: Option<String>, bytes: Option<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            kind: ArtifactKind::Image,
            url,
            thumbnail_url: None,
            duration: 0.0,
            resolution: String::new(),
            format: "png".to_string(),
            bytes,
        }
    }
}

/// Provider job as returned by job creation and status calls.
#[derive(Debug, Clone, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: StatusWord,
    #[serde(default, deserialize_with = "optional_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "optional_timestamp")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "optional_timestamp")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Provider-reported progress; zero when absent or null.
    #[serde(default, rename = "progress", deserialize_with = "lenient_progress")]
    pub provider_progress: u32,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "optional_lenient_string")]
    pub seconds: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub remixed_from_video_id: Option<String>,
    #[serde(default)]
    pub error: Option<JobError>,
    #[serde(default)]
    pub generations: Option<Vec<GenerationArtifact>>,
}

impl Job {
    pub fn from_slice(body: &[u8]) -> Result<Self, GenError> {
        serde_json::from_slice(body)
            .map_err(|e| GenError::SchemaParse(format!("video job response: {e}")))
    }

    pub fn status(&self) -> JobStatus {
        self.status.canonical
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Effective progress: the provider value when positive, otherwise an
    /// estimate from the attempt count.
    pub fn progress(&self, attempts: u32, max_attempts: u32) -> u8 {
        match self.status() {
            JobStatus::Succeeded => 100,
            JobStatus::Failed | JobStatus::Cancelled => 0,
            _ if self.provider_progress > 0 => self.provider_progress.min(100) as u8,
            status => estimate_progress(status, attempts, max_attempts),
        }
    }

    /// Fold a fresh poll response into this job.
    ///
    /// Returns false (and leaves the job untouched) once a terminal status
    /// has been reached.
    pub fn apply_poll(&mut self, polled: Job) -> bool {
        if self.is_terminal() {
            tracing::warn!(
                job_id = self.id,
                status = %self.status(),
                polled = polled.status.raw,
                "ignoring poll response for terminal job"
            );
            return false;
        }
        let id = std::mem::take(&mut self.id);
        *self = Job {
            id: if polled.id.is_empty() { id } else { polled.id },
            created_at: polled.created_at.or(self.created_at),
            model: polled.model.or_else(|| self.model.take()),
            seconds: polled.seconds.or_else(|| self.seconds.take()),
            size: polled.size.or_else(|| self.size.take()),
            ..polled
        };
        true
    }

    /// Generations to download: the reported list, or one synthesized from
    /// the job id when the provider omits it.
    pub fn artifacts(&self) -> Vec<GenerationArtifact> {
        match &self.generations {
            Some(list) if !list.is_empty() => list.clone(),
            _ => {
                tracing::info!(
                    job_id = self.id,
                    "job reported no generations list, synthesizing one from the job id"
                );
                vec![GenerationArtifact::synthesized(self)]
            }
        }
    }
}

/// Video job creation body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoGenerationRequest {
    pub prompt: String,
    /// `"WxH"`.
    pub size: String,
    /// Duration in seconds, as a string.
    pub seconds: String,
    pub model: String,
}

impl VideoGenerationRequest {
    /// Build a validated request. Durations are rounded up to the nearest
    /// supported value; sizes must be in [`SUPPORTED_SIZES`].
    pub fn new(
        prompt: impl Into<String>,
        width: u32,
        height: u32,
        seconds: u32,
        model: impl Into<String>,
    ) -> Result<Self, GenError> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(GenError::Other(
                "Please enter a prompt for video generation.".to_string(),
            ));
        }
        if !SUPPORTED_SIZES.contains(&(width, height)) {
            return Err(GenError::Other(format!(
                "unsupported video size {width}x{height}"
            )));
        }
        Ok(Self {
            prompt,
            size: format!("{width}x{height}"),
            seconds: round_seconds(seconds).to_string(),
            model: model.into(),
        })
    }
}

/// Round a requested duration to the supported set: <=4 -> 4, <=8 -> 8, else 12.
pub fn round_seconds(requested: u32) -> u32 {
    SUPPORTED_SECONDS
        .iter()
        .copied()
        .find(|s| requested <= *s)
        .unwrap_or(12)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Int(i64),
    Float(f64),
    Text(String),
}

fn optional_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<RawTimestamp> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(RawTimestamp::Int(secs)) => DateTime::from_timestamp(secs, 0)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("timestamp out of range: {secs}"))),
        Some(RawTimestamp::Float(secs)) => DateTime::from_timestamp(secs as i64, 0)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("timestamp out of range: {secs}"))),
        Some(RawTimestamp::Text(text)) => parse_iso8601(&text)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("unparseable timestamp: {text}"))),
    }
}

/// RFC 3339 first, then a naive ISO-8601 form assumed to be UTC.
fn parse_iso8601(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Accept `"4"` or `4` for fields the provider has shipped both ways.
fn optional_lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(match raw {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

/// `null` reads as the type's default, same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(optional_lenient_string(deserializer)?.unwrap_or_default())
}

fn format_or_default<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(optional_lenient_string(deserializer)?
        .filter(|f| !f.is_empty())
        .unwrap_or_else(default_format))
}

/// Integer or fractional percentages; anything else counts as unreported.
fn lenient_progress<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(serde_json::Value::as_f64)
        .filter(|p| p.is_finite() && *p > 0.0)
        .map_or(0, |p| p as u32))
}

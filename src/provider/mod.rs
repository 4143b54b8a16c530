pub mod auth;
pub mod chat;
pub mod image;
pub mod video;

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use reqwest::{Client, RequestBuilder, Response};

use crate::chat::ChatMessage;
use crate::error::GenError;
use crate::job::{GenerationArtifact, Job, VideoGenerationRequest};
use auth::Credentials;

pub use image::{GeneratedImage, ImageEditRequest, ImageRequest};

/// Max error-body bytes carried into a `GenError::Provider`.
const MAX_ERROR_BODY_BYTES: usize = 64 * 1024;

/// Max JSON response size for job and chat calls.
pub(crate) const MAX_RESPONSE_BYTES: usize = 2 * 1024 * 1024;

/// Lazily produced chat fragments. Finite, not restartable; dropping it
/// closes the underlying connection.
pub type FragmentStream = BoxStream<'static, Result<String, GenError>>;

/// Chat completion request as sent to the provider.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Deployment or model name.
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

/// Long-running video job calls.
#[async_trait]
pub trait VideoApi: Send + Sync {
    async fn create_job(&self, request: &VideoGenerationRequest) -> Result<Job, GenError>;
    async fn get_job_status(&self, job_id: &str) -> Result<Job, GenError>;
}

/// Binary content behind a generation artifact.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    async fn fetch_artifact(&self, artifact: &GenerationArtifact) -> Result<Vec<u8>, GenError>;
}

#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn stream_chat(&self, request: &ChatRequest) -> Result<FragmentStream, GenError>;
    async fn complete_chat(&self, request: &ChatRequest) -> Result<String, GenError>;
}

#[async_trait]
pub trait ImageApi: Send + Sync {
    async fn generate_image(&self, request: &ImageRequest) -> Result<GeneratedImage, GenError>;
    async fn edit_image(&self, request: &ImageEditRequest) -> Result<GeneratedImage, GenError>;
}

/// HTTP client for one provider endpoint. Implements every API trait.
pub struct ProviderClient {
    http: Client,
    endpoint: String,
    credentials: Credentials,
    api_version: Option<String>,
    video_api_version: Option<String>,
}

impl ProviderClient {
    pub fn new(endpoint: impl Into<String>, credentials: Credentials) -> Result<Self, GenError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(4)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GenError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            credentials,
            api_version: None,
            video_api_version: None,
        })
    }

    pub fn from_config(config: &crate::config::Config) -> Result<Self, GenError> {
        let client = Self::new(&config.provider.endpoint, config.credentials()?)?
            .with_api_version(config.provider.api_version.clone())
            .with_video_api_version(config.video.api_version.clone());
        Ok(client)
    }

    /// `api-version` query parameter for chat and image calls.
    pub fn with_api_version(mut self, version: Option<String>) -> Self {
        self.api_version = version;
        self
    }

    /// `api-version` query parameter for video calls.
    pub fn with_video_api_version(mut self, version: Option<String>) -> Self {
        self.video_api_version = version;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, path: &str, api_version: Option<&str>) -> String {
        match api_version {
            Some(v) => format!("{}{path}?api-version={v}", self.endpoint),
            None => format!("{}{path}", self.endpoint),
        }
    }

    /// Attach credentials, send, and turn any non-success status into
    /// `GenError::Provider` carrying the (capped) body.
    async fn send(&self, req: RequestBuilder) -> Result<Response, GenError> {
        let req = self.credentials.apply(req).await?;
        let response = req.send().await?;
        check_status(response).await
    }
}

pub(crate) async fn check_status(response: Response) -> Result<Response, GenError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let bytes = response.bytes().await.unwrap_or_default();
    let truncated = &bytes[..bytes.len().min(MAX_ERROR_BODY_BYTES)];
    Err(GenError::provider(
        status.as_u16(),
        String::from_utf8_lossy(truncated).into_owned(),
    ))
}

/// Read a JSON body, enforcing [`MAX_RESPONSE_BYTES`].
pub(crate) async fn read_capped(response: Response) -> Result<Vec<u8>, GenError> {
    let bytes = response.bytes().await?;
    if bytes.len() > MAX_RESPONSE_BYTES {
        return Err(GenError::SchemaParse(format!(
            "response too large: {} bytes (max {MAX_RESPONSE_BYTES})",
            bytes.len()
        )));
    }
    Ok(bytes.to_vec())
}

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::retrieval;
use super::{Publisher, cancellable};
use crate::error::GenError;
use crate::job::GenerationArtifact;
use crate::provider::{ArtifactSource, GeneratedImage, ImageApi, ImageEditRequest, ImageRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageState {
    Idle,
    Generating,
    Retrieving,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug)]
pub struct ImageOutcome {
    pub state: ImageState,
    /// Present when the provider call succeeded, with bytes if retrieved.
    pub artifact: Option<GenerationArtifact>,
    pub revised_prompt: Option<String>,
    pub message: String,
    pub error: Option<GenError>,
    /// Download failed after a successful call.
    pub retrieval_warning: Option<String>,
}

impl ImageOutcome {
    pub fn is_success(&self) -> bool {
        self.state == ImageState::Completed
    }

    fn terminal(state: ImageState, message: String, error: Option<GenError>) -> Self {
        Self {
            state,
            artifact: None,
            revised_prompt: None,
            message,
            error,
            retrieval_warning: None,
        }
    }
}

/// One-shot image generation and editing.
pub struct ImageOrchestrator<A: ?Sized> {
    api: Arc<A>,
    state: ImageState,
}

impl<A> ImageOrchestrator<A>
where
    A: ImageApi + ArtifactSource + ?Sized,
{
    pub fn new(api: Arc<A>) -> Self {
        Self {
            api,
            state: ImageState::Idle,
        }
    }

    pub fn state(&self) -> ImageState {
        self.state
    }

    pub async fn generate(
        &mut self,
        request: &ImageRequest,
        token: &CancellationToken,
        updates: &Publisher<ImageState>,
    ) -> ImageOutcome {
        if request.prompt.trim().is_empty() {
            let message = "Please enter a prompt for image generation.".to_string();
            self.set(ImageState::Failed, updates);
            return ImageOutcome::terminal(ImageState::Failed, message, None);
        }
        self.set(ImageState::Generating, updates);
        let result = cancellable(token, self.api.generate_image(request)).await;
        self.complete(result, "Error generating image", token, updates)
            .await
    }

    pub async fn edit(
        &mut self,
        request: &ImageEditRequest,
        token: &CancellationToken,
        updates: &Publisher<ImageState>,
    ) -> ImageOutcome {
        if request.prompt.trim().is_empty() || request.image.is_empty() {
            let message = "Please provide an image and a prompt to edit it.".to_string();
            self.set(ImageState::Failed, updates);
            return ImageOutcome::terminal(ImageState::Failed, message, None);
        }
        self.set(ImageState::Generating, updates);
        let result = cancellable(token, self.api.edit_image(request)).await;
        self.complete(result, "Error editing image", token, updates)
            .await
    }

    fn set(&mut self, state: ImageState, updates: &Publisher<ImageState>) {
        self.state = state;
        updates.publish(state);
    }

    async fn complete(
        &mut self,
        result: Result<GeneratedImage, GenError>,
        failure_prefix: &str,
        token: &CancellationToken,
        updates: &Publisher<ImageState>,
    ) -> ImageOutcome {
        let image = match result {
            Ok(image) => image,
            Err(e) if e.is_cancelled() => {
                self.set(ImageState::Cancelled, updates);
                return ImageOutcome::terminal(
                    ImageState::Cancelled,
                    "Image generation was cancelled.".to_string(),
                    Some(e),
                );
            }
            Err(e) => {
                tracing::warn!("image request failed: {e}");
                self.set(ImageState::Failed, updates);
                let message = format!("{failure_prefix}: {}", e.user_message());
                return ImageOutcome::terminal(ImageState::Failed, message, Some(e));
            }
        };

        let artifact = GenerationArtifact::image("image-1", image.url, image.bytes);
        let mut retrieval_warning = None;
        let artifact = if artifact.bytes.is_some() {
            Some(artifact)
        } else {
            self.set(ImageState::Retrieving, updates);
            let report = retrieval::retrieve(&*self.api, vec![artifact], token).await;
            if let Some(e) = &report.error {
                retrieval_warning = Some(if e.is_cancelled() {
                    "Image download was cancelled.".to_string()
                } else {
                    format!("Error retrieving image content: {}", e.user_message())
                });
            }
            report.artifacts.into_iter().next()
        };

        self.set(ImageState::Completed, updates);
        ImageOutcome {
            state: ImageState::Completed,
            artifact,
            revised_prompt: image.revised_prompt,
            message: "Image generated successfully.".to_string(),
            error: None,
            retrieval_warning,
        }
    }
}

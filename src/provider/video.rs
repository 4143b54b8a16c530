use async_trait::async_trait;

use super::{ArtifactSource, ProviderClient, VideoApi, read_capped};
use crate::error::GenError;
use crate::job::{ArtifactKind, GenerationArtifact, Job, VideoGenerationRequest};

#[async_trait]
impl VideoApi for ProviderClient {
    async fn create_job(&self, request: &VideoGenerationRequest) -> Result<Job, GenError> {
        let url = self.url("/video/generations/jobs", self.video_api_version.as_deref());
        tracing::info!(
            model = request.model,
            size = request.size,
            seconds = request.seconds,
            "creating video generation job"
        );

        let response = self
            .send(self.http.post(&url).json(request))
            .await
            .inspect_err(|e| tracing::error!("failed to create video generation job: {e}"))?;
        let job = Job::from_slice(&read_capped(response).await?)?;

        tracing::info!(job_id = job.id, status = job.status.raw, "video generation job created");
        Ok(job)
    }

    async fn get_job_status(&self, job_id: &str) -> Result<Job, GenError> {
        let url = self.url(
            &format!("/video/generations/jobs/{job_id}"),
            self.video_api_version.as_deref(),
        );
        let response = self
            .send(self.http.get(&url))
            .await
            .inspect_err(|e| tracing::warn!(job_id, "failed to get job status: {e}"))?;
        Job::from_slice(&read_capped(response).await?)
    }
}

#[async_trait]
impl ArtifactSource for ProviderClient {
    async fn fetch_artifact(&self, artifact: &GenerationArtifact) -> Result<Vec<u8>, GenError> {
        let bytes = match (artifact.kind, artifact.url.as_deref()) {
            (ArtifactKind::Video, _) => {
                let url = self.url(
                    &format!("/video/generations/{}/content/video", artifact.id),
                    self.video_api_version.as_deref(),
                );
                self.send(self.http.get(&url)).await?.bytes().await?
            }
            // pre-signed URL; credentials must not leak to a third-party host
            (ArtifactKind::Image, Some(url)) => {
                let response = self.http.get(url).send().await?;
                super::check_status(response).await?.bytes().await?
            }
            (ArtifactKind::Image, None) => {
                return Err(GenError::Other(format!(
                    "image artifact {} has neither bytes nor URL",
                    artifact.id
                )));
            }
        };
        tracing::info!(
            artifact_id = artifact.id,
            size = bytes.len(),
            "retrieved artifact content"
        );
        Ok(bytes.to_vec())
    }
}

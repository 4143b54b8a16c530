use tokio_util::sync::CancellationToken;

use super::cancellable;
use crate::error::GenError;
use crate::job::GenerationArtifact;
use crate::provider::ArtifactSource;

/// Result of downloading a completed operation's artifacts.
///
/// A failure here is secondary: it never changes the status of the job or
/// call that produced the artifacts.
#[derive(Debug, Default)]
pub struct RetrievalReport {
    /// Every artifact, in order; those fetched carry `bytes`.
    pub artifacts: Vec<GenerationArtifact>,
    /// First error that stopped retrieval.
    pub error: Option<GenError>,
}

impl RetrievalReport {
    /// Number of artifacts with content attached.
    pub fn downloaded(&self) -> usize {
        self.artifacts.iter().filter(|a| a.bytes.is_some()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.downloaded() == self.artifacts.len()
    }
}

/// Fetch artifact bytes sequentially under `token`. Artifacts that already
/// carry bytes are left alone. The first failure (or cancellation) stops
/// the stage; what was fetched before it is kept.
pub async fn retrieve<S>(
    source: &S,
    mut artifacts: Vec<GenerationArtifact>,
    token: &CancellationToken,
) -> RetrievalReport
where
    S: ArtifactSource + ?Sized,
{
    let mut error = None;
    for artifact in artifacts.iter_mut().filter(|a| a.bytes.is_none()) {
        match cancellable(token, source.fetch_artifact(artifact)).await {
            Ok(bytes) => artifact.bytes = Some(bytes),
            Err(e) => {
                if !e.is_cancelled() {
                    tracing::warn!(artifact_id = artifact.id, "artifact retrieval failed: {e}");
                }
                error = Some(e);
                break;
            }
        }
    }
    RetrievalReport { artifacts, error }
}

//! Artifact download.

use staging_core::ArtifactId;

use crate::error::Result;
use crate::service::StagingService;
use crate::views::ArtifactPayload;

impl StagingService {
    /// Bytes and content type of an original or staged image.
    ///
    /// Expired artifacts are reported as not found.
    pub async fn get_artifact(&self, id: ArtifactId) -> Result<ArtifactPayload> {
        let artifact = self.inner.artifacts.get(id).await?;
        Ok(ArtifactPayload {
            id,
            bytes: artifact.bytes,
            content_type: artifact.meta.content_type,
        })
    }
}

//! Job intake: validate an upload, store it and queue a job for it.

use actors::payload::{self, ImageInfo};
use chrono::Utc;
use staging_core::{
    ArtifactId, ArtifactKind, BatchId, FailureKind, Job, JobEvent, JobId, StagingConfig,
    StyleParams, ValidationError,
};

use crate::error::Result;
use crate::rate_limit::identity_for;
use crate::service::StagingService;
use crate::views::{CreateJobRequest, ImageUpload, JobAccepted};

/// Check an upload before anything is stored.
///
/// Checks run cheapest first: emptiness, size, declared type, then the
/// image header.
pub fn validate_upload(
    config: &StagingConfig,
    upload: &ImageUpload,
) -> std::result::Result<ImageInfo, ValidationError> {
    if upload.bytes.is_empty() {
        return Err(ValidationError::EmptyPayload);
    }
    if upload.bytes.len() > config.max_upload_bytes {
        return Err(ValidationError::TooLarge {
            size: upload.bytes.len(),
            max: config.max_upload_bytes,
        });
    }
    if !config.is_supported_mime(&upload.content_type) {
        return Err(ValidationError::UnsupportedMediaType(
            upload.content_type.clone(),
        ));
    }

    let info = payload::probe(&upload.bytes).ok_or(ValidationError::NotAnImage)?;
    if !config.is_supported_mime(info.kind.content_type()) {
        return Err(ValidationError::UnsupportedMediaType(
            info.kind.content_type().to_string(),
        ));
    }
    if info.width < config.min_dimension || info.height < config.min_dimension {
        return Err(ValidationError::TooSmall {
            width: info.width,
            height: info.height,
            min: config.min_dimension,
        });
    }

    Ok(info)
}

impl StagingService {
    /// Accept an image for staging and return without waiting for the transform.
    ///
    /// A rejected or failed call leaves no job, artifact or rate limit use behind.
    pub async fn create_job(&self, request: CreateJobRequest) -> Result<JobAccepted> {
        let CreateJobRequest {
            image,
            style,
            owner_id,
            client_key,
        } = request;

        let info = validate_upload(&self.inner.config, &image)?;

        let identity = identity_for(client_key.as_deref(), owner_id.as_deref());
        self.reserve(&identity, 1)?;

        let job = match self
            .stage(JobId::new(), image, info, style, owner_id, None)
            .await
        {
            Ok(job) => job,
            Err(e) => {
                self.refund(&identity, 1);
                return Err(e);
            }
        };
        if let Err(e) = self.launch(&job).await {
            self.refund(&identity, 1);
            return Err(e);
        }

        tracing::info!("Accepted job {} from {}", job.id, identity);
        Ok(JobAccepted {
            job_id: job.id,
            status: job.state(),
            estimated_seconds: job.estimated_seconds,
        })
    }

    /// Store a validated upload and register it as pending job `job_id`.
    ///
    /// The stored image is removed again if the job cannot be registered.
    pub(crate) async fn stage(
        &self,
        job_id: JobId,
        image: ImageUpload,
        info: ImageInfo,
        style: StyleParams,
        owner_id: Option<String>,
        batch_id: Option<BatchId>,
    ) -> Result<Job> {
        let inner = &self.inner;

        let input = inner
            .artifacts
            .put(ArtifactKind::Original, info.kind.content_type(), image.bytes)
            .await?;

        let mut job = Job::new(input.id, style)
            .with_id(job_id)
            .with_owner(owner_id)
            .with_estimated_seconds(inner.config.estimated_seconds);
        if let Some(batch_id) = batch_id {
            job = job.with_batch(batch_id);
        }

        match inner.registry.create(job).await {
            Ok(job) => Ok(job),
            Err(e) => {
                self.discard_artifact(input.id).await;
                Err(e.into())
            }
        }
    }

    /// Announce a staged job and hand it to the dispatcher.
    ///
    /// If dispatch fails the job and its image are removed and the
    /// announcement is followed by a `JobFailed` event.
    pub(crate) async fn launch(&self, job: &Job) -> Result<()> {
        self.broadcast(JobEvent::JobSubmitted {
            job: Box::new(job.clone()),
            timestamp: Utc::now(),
        });

        if let Err(e) = self.inner.dispatcher.dispatch(job.id) {
            tracing::error!("Failed to dispatch job {}: {}", job.id, e);
            self.unstage(job).await;
            self.broadcast(JobEvent::JobFailed {
                job_id: job.id,
                error: e.to_string(),
                kind: FailureKind::Internal,
                timestamp: Utc::now(),
            });
            return Err(e.into());
        }
        Ok(())
    }

    /// Remove a job that never ran, along with its stored image.
    pub(crate) async fn unstage(&self, job: &Job) {
        if let Err(e) = self.inner.registry.delete(job.id).await {
            tracing::warn!("Failed to roll back job {}: {}", job.id, e);
        }
        if let Some(input) = job.input {
            self.discard_artifact(input).await;
        }
    }

    async fn discard_artifact(&self, id: ArtifactId) {
        if let Err(e) = self.inner.artifacts.delete(id).await {
            tracing::warn!("Failed to roll back artifact {}: {}", id, e);
        }
    }
}

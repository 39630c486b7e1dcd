//! Batch coordination: fan a set of uploads out into independent jobs.

use chrono::Utc;
use futures_util::future::join_all;
use staging_core::{
    Batch, BatchId, FailureKind, Job, JobEvent, JobId, StyleParams, ValidationError,
};

use crate::error::Result;
use crate::intake::validate_upload;
use crate::rate_limit::identity_for;
use crate::service::StagingService;
use crate::views::{BatchAccepted, BatchStatusView, CreateBatchRequest, ImageUpload, JobSummary};

impl StagingService {
    /// Queue one job per image.
    ///
    /// Rate limit slots for the whole batch are taken up front. After that an
    /// image that cannot be accepted becomes a failed member and the rest of
    /// the batch carries on. Members are only announced and dispatched once
    /// the batch itself is recorded; if that fails nothing is left behind.
    pub async fn create_batch(&self, request: CreateBatchRequest) -> Result<BatchAccepted> {
        let CreateBatchRequest {
            images,
            style,
            owner_id,
            client_key,
        } = request;
        let config = &self.inner.config;

        if images.is_empty() {
            return Err(ValidationError::EmptyBatch.into());
        }
        if images.len() > config.max_batch_size {
            return Err(ValidationError::BatchTooLarge {
                count: images.len(),
                max: config.max_batch_size,
            }
            .into());
        }

        let identity = identity_for(client_key.as_deref(), owner_id.as_deref());
        let slots = images.len() as u32;
        self.reserve(&identity, slots)?;

        let batch_id = BatchId::new();
        let staged = join_all(
            images
                .into_iter()
                .map(|image| self.stage_member(batch_id, image, &style, &owner_id)),
        )
        .await;
        let staged: Vec<Job> = staged.into_iter().flatten().collect();

        let job_ids: Vec<JobId> = staged.iter().map(|job| job.id).collect();
        let batch = Batch::new(batch_id, job_ids.clone(), style).with_owner(owner_id.clone());
        if let Err(e) = self.inner.registry.create_batch(batch).await {
            tracing::error!("Failed to record batch {}: {}", batch_id, e);
            for job in &staged {
                self.unstage(job).await;
            }
            self.refund(&identity, slots);
            return Err(e.into());
        }

        let mut members = Vec::with_capacity(staged.len());
        for job in staged {
            if job.input.is_none() {
                members.push(job);
                continue;
            }
            match self.launch(&job).await {
                Ok(()) => members.push(job),
                Err(e) => {
                    let failed =
                        Job::failed_on_intake(job.style, e.to_string(), FailureKind::Internal)
                            .with_id(job.id);
                    members.extend(self.record_failed_member(batch_id, failed, &owner_id).await);
                }
            }
        }

        let accepted = members.iter().filter(|job| job.input.is_some()).count();
        self.refund(&identity, slots - accepted as u32);

        tracing::info!(
            "Accepted batch {} ({} of {} images queued)",
            batch_id,
            accepted,
            slots
        );
        self.broadcast(JobEvent::BatchSubmitted {
            batch_id,
            job_ids,
            timestamp: Utc::now(),
        });

        Ok(BatchAccepted {
            batch_id,
            total: members.len(),
            accepted,
            rejected: members.len() - accepted,
            jobs: members.iter().map(JobSummary::from).collect(),
            estimated_seconds: config.estimated_seconds * accepted as u64,
        })
    }

    /// Current counts and aggregate status of a batch.
    pub async fn get_batch(&self, batch_id: BatchId) -> Result<BatchStatusView> {
        let batch = self.inner.registry.get_batch(batch_id).await?;
        let jobs = self.inner.registry.batch_jobs(&batch).await?;
        Ok(BatchStatusView::new(batch.id, &jobs))
    }

    /// Register one image of a batch, recording it as a failed member if it cannot run.
    ///
    /// Returns `None` only when not even the failed member could be recorded.
    async fn stage_member(
        &self,
        batch_id: BatchId,
        image: ImageUpload,
        style: &StyleParams,
        owner_id: &Option<String>,
    ) -> Option<Job> {
        let failed = match validate_upload(&self.inner.config, &image) {
            Ok(info) => {
                match self
                    .stage(
                        JobId::new(),
                        image,
                        info,
                        style.clone(),
                        owner_id.clone(),
                        Some(batch_id),
                    )
                    .await
                {
                    Ok(job) => return Some(job),
                    Err(e) => {
                        tracing::warn!("Batch {} member could not be queued: {}", batch_id, e);
                        Job::failed_on_intake(style.clone(), e.to_string(), FailureKind::Internal)
                    }
                }
            }
            Err(e) => {
                tracing::debug!("Batch {} member rejected: {}", batch_id, e);
                Job::rejected(style.clone(), e.to_string())
            }
        };

        self.record_failed_member(batch_id, failed, owner_id).await
    }

    async fn record_failed_member(
        &self,
        batch_id: BatchId,
        failed: Job,
        owner_id: &Option<String>,
    ) -> Option<Job> {
        let failed = failed
            .with_owner(owner_id.clone())
            .with_batch(batch_id)
            .with_estimated_seconds(self.inner.config.estimated_seconds);
        match self.inner.registry.create(failed).await {
            Ok(job) => Some(job),
            Err(e) => {
                tracing::error!("Failed to record rejected member of batch {}: {}", batch_id, e);
                None
            }
        }
    }
}

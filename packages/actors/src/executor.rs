//! The background executor: one staging run for one job.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use db::{DbError, StatusRegistry};
use serde::{Deserialize, Serialize};
use staging_core::{
    ArtifactId, ArtifactKind, FailureKind, Job, JobEvent, JobId, JobState, JobTransition,
    TransformError,
};
use storage::ArtifactStore;
use tokio::sync::broadcast;

use crate::adapter::TransformAdapter;
use crate::payload;

/// How a single execution ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Completed {
        output: ArtifactId,
        processing_time_ms: u64,
    },
    Failed {
        kind: FailureKind,
        error: String,
    },
    /// Nothing was recorded for the job.
    Skipped { reason: String },
}

/// Runs the transform for a job and records the result in the registry.
///
/// `run` never returns an error: every failure ends up on the job.
pub struct Executor {
    registry: StatusRegistry,
    artifacts: ArtifactStore,
    adapter: Arc<dyn TransformAdapter>,
    timeout: Duration,
    event_tx: Option<broadcast::Sender<JobEvent>>,
}

impl Executor {
    pub fn new(
        registry: StatusRegistry,
        artifacts: ArtifactStore,
        adapter: Arc<dyn TransformAdapter>,
    ) -> Self {
        Self {
            registry,
            artifacts,
            adapter,
            timeout: Duration::from_secs(45),
            event_tx: None,
        }
    }

    /// Set the hard timeout for one adapter call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the event broadcaster.
    pub fn with_event_tx(mut self, tx: broadcast::Sender<JobEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn broadcast(&self, event: JobEvent) {
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(event);
        }
    }

    /// Execute `job_id` once. Jobs that are not pending are left alone.
    pub async fn run(&self, job_id: JobId, worker_id: &str) -> ExecutionOutcome {
        let job = match self.registry.get(job_id).await {
            Ok(job) => job,
            Err(e) => return skipped(format!("cannot load job {}: {}", job_id, e)),
        };
        if job.state() != JobState::Pending {
            return skipped(format!("job {} is already {}", job_id, job.state()));
        }

        match self.registry.update(job_id, JobTransition::start()).await {
            Ok(_) => {}
            Err(DbError::InvalidTransition(e)) => {
                return skipped(format!("job {} was claimed elsewhere ({})", job_id, e));
            }
            Err(e) => return skipped(format!("cannot start job {}: {}", job_id, e)),
        }

        tracing::info!(
            "Worker {} staging job {} with {}",
            worker_id,
            job_id,
            self.adapter.name()
        );
        self.broadcast(JobEvent::JobStarted {
            job_id,
            worker_id: worker_id.to_string(),
            timestamp: Utc::now(),
        });

        let started = Instant::now();
        match self.transform(&job).await {
            Ok((output, quality_score)) => {
                let processing_time_ms = started.elapsed().as_millis() as u64;
                self.complete(job_id, output, processing_time_ms, quality_score)
                    .await
            }
            Err(e) => self.fail(job_id, e).await,
        }
    }

    async fn transform(&self, job: &Job) -> Result<(ArtifactId, Option<f64>), TransformError> {
        let input = job
            .input
            .ok_or_else(|| TransformError::MissingInput("job has no input image".into()))?;
        let original = self
            .artifacts
            .get(input)
            .await
            .map_err(|e| TransformError::MissingInput(e.to_string()))?;

        let response = tokio::time::timeout(
            self.timeout,
            self.adapter.transform(original.bytes, job.style.clone()),
        )
        .await
        .map_err(|_| TransformError::Timeout(self.timeout.as_secs()))??;

        let staged = payload::normalize(response.payload, response.encoding)?;
        let staged = tokio::task::spawn_blocking(move || {
            payload::verify_decodes(&staged).map(|_| staged)
        })
        .await
        .map_err(|e| TransformError::MalformedResponse(format!("decode task failed: {e}")))??;

        let meta = self
            .artifacts
            .put(ArtifactKind::Staged, staged.kind.content_type(), staged.bytes)
            .await
            .map_err(|e| TransformError::Storage(e.to_string()))?;

        Ok((meta.id, response.quality_score))
    }

    async fn complete(
        &self,
        job_id: JobId,
        output: ArtifactId,
        processing_time_ms: u64,
        quality_score: Option<f64>,
    ) -> ExecutionOutcome {
        let transition = JobTransition::complete(output, processing_time_ms, quality_score);
        if let Err(e) = self.registry.update(job_id, transition).await {
            // The job already ended (usually as stale); drop the orphan output.
            if let Err(e) = self.artifacts.delete(output).await {
                tracing::warn!("Failed to delete orphaned artifact {}: {}", output, e);
            }
            return skipped(format!("cannot complete job {}: {}", job_id, e));
        }

        tracing::info!("Job {} completed in {}ms", job_id, processing_time_ms);
        self.broadcast(JobEvent::JobCompleted {
            job_id,
            output,
            duration_ms: processing_time_ms,
            timestamp: Utc::now(),
        });

        ExecutionOutcome::Completed {
            output,
            processing_time_ms,
        }
    }

    async fn fail(&self, job_id: JobId, error: TransformError) -> ExecutionOutcome {
        let kind = error.kind();
        let message = error.to_string();
        tracing::warn!("Job {} failed: {}", job_id, message);

        if let Err(e) = self
            .registry
            .update(job_id, JobTransition::fail(message.clone(), kind))
            .await
        {
            return skipped(format!("cannot record failure of job {}: {}", job_id, e));
        }

        self.broadcast(JobEvent::JobFailed {
            job_id,
            error: message.clone(),
            kind,
            timestamp: Utc::now(),
        });

        ExecutionOutcome::Failed {
            kind,
            error: message,
        }
    }
}

fn skipped(reason: String) -> ExecutionOutcome {
    tracing::debug!("Skipping execution: {}", reason);
    ExecutionOutcome::Skipped { reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterResponse, PayloadEncoding};
    use crate::transform_adapter;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use bytes::Bytes;
    use image::{ImageBuffer, Rgb};
    use staging_core::{StalenessPolicy, StyleParams};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn png(size: u32) -> Bytes {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_fn(size, size, |x, y| Rgb([x as u8, y as u8, 0]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        Bytes::from(out.into_inner())
    }

    struct Harness {
        registry: StatusRegistry,
        artifacts: ArtifactStore,
    }

    impl Harness {
        async fn new() -> Self {
            Self {
                registry: StatusRegistry::in_memory(StalenessPolicy::default()),
                artifacts: ArtifactStore::in_memory().await.unwrap(),
            }
        }

        async fn submit(&self) -> JobId {
            let input = self
                .artifacts
                .put(ArtifactKind::Original, "image/png", png(16))
                .await
                .unwrap();
            let job = Job::new(input.id, StyleParams::default());
            self.registry.create(job).await.unwrap().id
        }

        fn executor(&self, adapter: impl TransformAdapter) -> Executor {
            Executor::new(
                self.registry.clone(),
                self.artifacts.clone(),
                Arc::new(adapter),
            )
        }
    }

    #[tokio::test]
    async fn completes_and_stores_the_output() {
        let h = Harness::new().await;
        let job_id = h.submit().await;
        let (tx, mut rx) = broadcast::channel(16);
        let executor = h
            .executor(transform_adapter!("echo", |image, _style| {
                Ok(AdapterResponse::new(image).with_quality_score(0.85))
            }))
            .with_event_tx(tx);

        let outcome = executor.run(job_id, "worker-0").await;
        let ExecutionOutcome::Completed { output, .. } = outcome else {
            panic!("expected completion, got {outcome:?}");
        };

        let job = h.registry.get(job_id).await.unwrap();
        assert_eq!(job.output(), Some(output));
        assert_eq!(job.quality_score(), Some(0.85));
        assert!(job.processing_time_ms().is_some());

        let staged = h.artifacts.get(output).await.unwrap();
        assert_eq!(staged.bytes, png(16));
        assert_eq!(staged.meta.kind, ArtifactKind::Staged);
        assert_eq!(staged.meta.content_type, "image/png");

        assert!(matches!(rx.recv().await.unwrap(), JobEvent::JobStarted { .. }));
        assert!(matches!(rx.recv().await.unwrap(), JobEvent::JobCompleted { .. }));
    }

    #[tokio::test]
    async fn base64_responses_are_stored_as_raw_bytes() {
        let h = Harness::new().await;
        let job_id = h.submit().await;
        let executor = h.executor(transform_adapter!("b64", |image, _style| {
            Ok(AdapterResponse::new(STANDARD.encode(&image)).with_encoding(PayloadEncoding::Base64))
        }));

        let ExecutionOutcome::Completed { output, .. } = executor.run(job_id, "w").await else {
            panic!("expected completion");
        };
        assert_eq!(h.artifacts.get(output).await.unwrap().bytes, png(16));
    }

    #[tokio::test]
    async fn adapter_errors_fail_the_job_without_output() {
        let h = Harness::new().await;
        let job_id = h.submit().await;
        let executor = h.executor(transform_adapter!("refuses", |_image, _style| {
            Err(TransformError::Rejected("content policy".into()))
        }));

        let outcome = executor.run(job_id, "w").await;
        assert!(matches!(
            outcome,
            ExecutionOutcome::Failed {
                kind: FailureKind::Transform,
                ..
            }
        ));

        let job = h.registry.get(job_id).await.unwrap();
        assert!(job.error().unwrap().contains("content policy"));
        assert!(job.output().is_none());
        // Only the original is stored.
        assert_eq!(h.artifacts.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn slow_adapters_time_out() {
        let h = Harness::new().await;
        let job_id = h.submit().await;
        let executor = h
            .executor(transform_adapter!("slow", |image, _style| {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(AdapterResponse::new(image))
            }))
            .with_timeout(Duration::from_millis(50));

        let outcome = executor.run(job_id, "w").await;
        assert!(matches!(
            outcome,
            ExecutionOutcome::Failed {
                kind: FailureKind::Timeout,
                ..
            }
        ));
        assert_eq!(
            h.registry.get(job_id).await.unwrap().failure_kind(),
            Some(FailureKind::Timeout)
        );
    }

    #[tokio::test]
    async fn unusable_payloads_fail_the_job() {
        let h = Harness::new().await;
        let job_id = h.submit().await;
        let executor = h.executor(transform_adapter!("garbage", |_image, _style| {
            Ok(AdapterResponse::binary(Bytes::from_static(b"<html>oops</html>")))
        }));

        assert!(matches!(
            executor.run(job_id, "w").await,
            ExecutionOutcome::Failed {
                kind: FailureKind::Transform,
                ..
            }
        ));
        assert_eq!(h.artifacts.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn missing_input_fails_the_job() {
        let h = Harness::new().await;
        let job_id = h.submit().await;
        let input = h.registry.get(job_id).await.unwrap().input.unwrap();
        h.artifacts.delete(input).await.unwrap();

        let executor = h.executor(transform_adapter!("echo", |image, _style| {
            Ok(AdapterResponse::new(image))
        }));
        assert!(matches!(
            executor.run(job_id, "w").await,
            ExecutionOutcome::Failed {
                kind: FailureKind::Internal,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn repeated_runs_are_no_ops() {
        let h = Harness::new().await;
        let job_id = h.submit().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let executor = h.executor(crate::FnAdapter::new("counting", move |image, _style| {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { Ok::<_, TransformError>(AdapterResponse::new(image)) })
        }));

        assert!(matches!(
            executor.run(job_id, "w").await,
            ExecutionOutcome::Completed { .. }
        ));
        let first = h.registry.get(job_id).await.unwrap();

        assert!(matches!(
            executor.run(job_id, "w").await,
            ExecutionOutcome::Skipped { .. }
        ));
        assert!(matches!(
            executor.run(JobId::new(), "w").await,
            ExecutionOutcome::Skipped { .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.registry.get(job_id).await.unwrap().status, first.status);
        assert_eq!(h.artifacts.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn output_is_discarded_when_the_job_went_stale() {
        let h = Harness::new().await;
        let job_id = h.submit().await;
        let registry = h.registry.clone();
        let executor = h.executor(crate::FnAdapter::new("late", move |image, _style| {
            let registry = registry.clone();
            Box::pin(async move {
                // The registry times the job out while the adapter is working.
                let stale = JobTransition::fail("Processing timed out", FailureKind::Stale);
                registry.update(job_id, stale).await.unwrap();
                Ok::<_, TransformError>(AdapterResponse::new(image))
            })
        }));

        assert!(matches!(
            executor.run(job_id, "w").await,
            ExecutionOutcome::Skipped { .. }
        ));
        let job = h.registry.get(job_id).await.unwrap();
        assert_eq!(job.failure_kind(), Some(FailureKind::Stale));
        assert!(job.output().is_none());
        assert_eq!(h.artifacts.count().await.unwrap(), 1);
    }
}

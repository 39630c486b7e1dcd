#![allow(dead_code)]

use std::error::Error;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actors::{AdapterResponse, DispatchError, Dispatcher, TransformAdapter, transform_adapter};
use api::{BatchId, BatchStatusView, JobId, JobView, StagingConfig, StagingService};
use bytes::Bytes;
use db::{DbError, JobStore, MemoryJobStore, StatusRegistry, StoreFuture};
use image::{ImageBuffer, ImageFormat, Rgb};
use staging_core::{Batch, Job, JobState};
use storage::ArtifactStore;

/// A small PNG that passes validation under [`config`].
pub fn png(width: u32, height: u32) -> Bytes {
    let img: ImageBuffer<Rgb<u8>, Vec<u8>> =
        ImageBuffer::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 128]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    Bytes::from(out.into_inner())
}

/// Test defaults: tiny images are fine and transforms time out quickly.
pub fn config() -> StagingConfig {
    StagingConfig::default()
        .with_min_dimension(32)
        .with_transform_timeout(Duration::from_secs(5))
        .with_max_concurrent_jobs(2)
}

/// Returns the input unchanged.
pub fn echo_adapter() -> impl TransformAdapter {
    transform_adapter!("echo", |image, _style| {
        Ok(AdapterResponse::binary(image).with_quality_score(0.8))
    })
}

/// A service running jobs on its own pool, with in-memory storage.
pub async fn service(
    config: StagingConfig,
    adapter: impl TransformAdapter,
) -> Result<StagingService, Box<dyn Error>> {
    let registry = StatusRegistry::in_memory(config.staleness());
    let artifacts = ArtifactStore::in_memory().await?;
    Ok(StagingService::start(config, registry, artifacts, Arc::new(adapter)).await?)
}

/// Accepts every job and never runs any.
#[derive(Default)]
pub struct HoldingDispatcher {
    pub dispatched: Mutex<Vec<JobId>>,
}

impl Dispatcher for HoldingDispatcher {
    fn dispatch(&self, job_id: JobId) -> Result<(), DispatchError> {
        self.dispatched.lock().unwrap().push(job_id);
        Ok(())
    }
}

pub struct FailingDispatcher;

impl Dispatcher for FailingDispatcher {
    fn dispatch(&self, _job_id: JobId) -> Result<(), DispatchError> {
        Err(DispatchError::Unavailable("pool is down".into()))
    }
}

/// Stores jobs in memory but refuses every batch record.
#[derive(Default)]
pub struct BatchlessStore {
    jobs: MemoryJobStore,
}

impl JobStore for BatchlessStore {
    fn name(&self) -> &str {
        "batchless"
    }

    fn insert_job(&self, job: Job) -> StoreFuture<'_, ()> {
        self.jobs.insert_job(job)
    }

    fn load_job(&self, id: JobId) -> StoreFuture<'_, Option<Job>> {
        self.jobs.load_job(id)
    }

    fn compare_and_set(&self, job: Job, expected: JobState) -> StoreFuture<'_, bool> {
        self.jobs.compare_and_set(job, expected)
    }

    fn remove_job(&self, id: JobId) -> StoreFuture<'_, ()> {
        self.jobs.remove_job(id)
    }

    fn count_jobs(&self) -> StoreFuture<'_, usize> {
        self.jobs.count_jobs()
    }

    fn insert_batch(&self, batch: Batch) -> StoreFuture<'_, ()> {
        Box::pin(async move { Err(DbError::Query(format!("cannot write batch {}", batch.id))) })
    }

    fn load_batch(&self, id: BatchId) -> StoreFuture<'_, Option<Batch>> {
        self.jobs.load_batch(id)
    }
}

/// A service whose jobs stay pending until the test moves them.
pub async fn held_service(
    config: StagingConfig,
) -> Result<(StagingService, Arc<HoldingDispatcher>), Box<dyn Error>> {
    let dispatcher = Arc::new(HoldingDispatcher::default());
    let registry = StatusRegistry::in_memory(config.staleness());
    let artifacts = ArtifactStore::in_memory().await?;
    let service =
        StagingService::with_dispatcher(config, registry, artifacts, dispatcher.clone())?;
    Ok((service, dispatcher))
}

pub async fn wait_for_job(service: &StagingService, job_id: JobId) -> JobView {
    for _ in 0..500 {
        let view = service.get_job(job_id).await.unwrap();
        if view.status.is_terminal() {
            return view;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} did not finish in time", job_id);
}

pub async fn wait_for_batch(service: &StagingService, batch_id: BatchId) -> BatchStatusView {
    for _ in 0..500 {
        let view = service.get_batch(batch_id).await.unwrap();
        if view.status.is_terminal() {
            return view;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("batch {} did not finish in time", batch_id);
}

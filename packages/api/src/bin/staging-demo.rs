//! Stage a few generated room photos with a local stand-in model.
//!
//! Configuration comes from the same environment variables as a server
//! deployment; with none set everything runs in memory.

use std::error::Error;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use actors::{AdapterResponse, transform_adapter};
use api::{
    CreateBatchRequest, CreateJobRequest, ImageUpload, StagingConfig, StagingService, StyleParams,
    init_staging,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use image::{ImageBuffer, ImageFormat, Rgb};
use staging_core::TransformError;
use tracing_subscriber::EnvFilter;

const CLIENT: &str = "127.0.0.1";
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A flat-colored "empty room".
fn room(width: u32, height: u32, shade: u8) -> Result<Bytes, image::ImageError> {
    let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_fn(width, height, |_, y| {
        // Darker floor below the horizon line.
        if y > height * 2 / 3 {
            Rgb([shade / 2, shade / 3, shade / 4])
        } else {
            Rgb([shade, shade, shade.saturating_sub(20)])
        }
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Jpeg)?;
    Ok(Bytes::from(out.into_inner()))
}

fn brighten(image: &[u8]) -> Result<Vec<u8>, TransformError> {
    let img =
        image::load_from_memory(image).map_err(|e| TransformError::Adapter(e.to_string()))?;
    let mut out = Cursor::new(Vec::new());
    img.brighten(24)
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|e| TransformError::Adapter(e.to_string()))?;
    Ok(out.into_inner())
}

/// How long polling may take before a job must have become terminal.
///
/// A processing job reads as failed once its staleness bound passes; queued
/// jobs wait behind the others, one round per worker.
fn poll_deadline(config: &StagingConfig, jobs: usize) -> Duration {
    let bound = Duration::from_secs_f64(
        config.estimated_seconds as f64 * config.staleness_multiplier,
    );
    let rounds = jobs.div_ceil(config.max_concurrent_jobs.max(1)).max(1) as u32;
    bound * rounds + POLL_INTERVAL
}

async fn wait_for_job(
    service: &StagingService,
    job_id: api::JobId,
) -> Result<api::JobView, Box<dyn Error>> {
    let deadline = poll_deadline(service.config(), 1);
    let view = tokio::time::timeout(deadline, async {
        loop {
            let view = service.get_job(job_id).await?;
            if view.status.is_terminal() {
                return Ok::<_, api::StagingError>(view);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    })
    .await??;
    Ok(view)
}

async fn wait_for_batch(
    service: &StagingService,
    batch_id: api::BatchId,
    members: usize,
) -> Result<api::BatchStatusView, Box<dyn Error>> {
    let deadline = poll_deadline(service.config(), members);
    let view = tokio::time::timeout(deadline, async {
        loop {
            let view = service.get_batch(batch_id).await?;
            if view.status.is_terminal() {
                return Ok::<_, api::StagingError>(view);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    })
    .await??;
    Ok(view)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Replies in base64 like most hosted image models.
    let adapter = transform_adapter!("local-brighten", |image, style| {
        tokio::time::sleep(Duration::from_millis(300)).await;
        let staged = tokio::task::spawn_blocking(move || brighten(&image))
            .await
            .map_err(|e| TransformError::Adapter(e.to_string()))??;
        tracing::debug!("Staged a {} room", style.style);
        Ok(AdapterResponse::base64(STANDARD.encode(staged)).with_quality_score(0.9))
    });

    let service = init_staging(Arc::new(adapter)).await?;
    let style = StyleParams::new("modern").with_room_type("living_room");

    let single = service
        .create_job(
            CreateJobRequest::new(ImageUpload::new(room(768, 512, 180)?, "image/jpeg"), style.clone())
                .with_client_key(CLIENT),
        )
        .await?;
    tracing::info!(
        "Job {} queued, expect about {}s",
        single.job_id,
        single.estimated_seconds
    );

    let images = vec![
        ImageUpload::new(room(800, 600, 140)?, "image/jpeg"),
        ImageUpload::new(room(1024, 768, 210)?, "image/jpeg"),
        ImageUpload::new(Bytes::from_static(b"not an image"), "image/jpeg"),
    ];
    let batch = service
        .create_batch(CreateBatchRequest::new(images, style).with_client_key(CLIENT))
        .await?;
    tracing::info!(
        "Batch {} queued: {} accepted, {} rejected",
        batch.batch_id,
        batch.accepted,
        batch.rejected
    );

    let job = wait_for_job(&service, single.job_id).await?;
    println!("{}", serde_json::to_string_pretty(&job)?);

    if let Some(staged) = job.staged_ref {
        let artifact = service.get_artifact(staged).await?;
        tracing::info!(
            "Staged image {} is {} bytes of {}",
            artifact.id,
            artifact.bytes.len(),
            artifact.content_type
        );
    }

    let status = wait_for_batch(&service, batch.batch_id, batch.accepted).await?;
    println!("{}", serde_json::to_string_pretty(&status)?);

    if let Some(usage) = service.usage(CLIENT) {
        println!("{}", serde_json::to_string_pretty(&usage)?);
    }

    service.shutdown().await;
    Ok(())
}

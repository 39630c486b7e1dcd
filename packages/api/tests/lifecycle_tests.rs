#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use actors::{AdapterResponse, transform_adapter};
use api::{
    CreateJobRequest, FailureKind, ImageUpload, JobEvent, JobState, StagingError,
    StagingService, StyleParams, parse_job_id,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use db::StatusRegistry;
use staging_core::{ArtifactId, BatchId, JobId, JobTransition, TransformError};
use storage::{ArtifactEncoding, ArtifactStore, ArtifactStoreConfig, Storage, StorageConfig};

fn request(bytes: bytes::Bytes) -> CreateJobRequest {
    CreateJobRequest::new(ImageUpload::new(bytes, "image/png"), StyleParams::new("scandinavian"))
}

#[tokio::test]
async fn test_completed_job_reads_are_stable() -> Result<(), Box<dyn Error>> {
    let service = common::service(common::config(), common::echo_adapter()).await?;

    let accepted = service.create_job(request(common::png(48, 48))).await?;
    let done = common::wait_for_job(&service, accepted.job_id).await;

    assert_eq!(done.status, JobState::Completed);
    assert!(done.staged_ref.is_some());
    assert!(done.error.is_none());
    assert!(done.completed_at.is_some());
    assert!(done.processing_time_ms.is_some());
    assert_eq!(done.quality_score, Some(0.8));

    for _ in 0..5 {
        let again = service.get_job(accepted.job_id).await?;
        assert_eq!(again, done);
    }

    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_failed_job_has_error_and_no_output() -> Result<(), Box<dyn Error>> {
    let refusing = transform_adapter!("refusing", |_image, _style| {
        Err(TransformError::Rejected("content policy".into()))
    });
    let service = common::service(common::config(), refusing).await?;

    let accepted = service.create_job(request(common::png(48, 48))).await?;
    let done = common::wait_for_job(&service, accepted.job_id).await;

    assert_eq!(done.status, JobState::Failed);
    assert_eq!(done.failure_kind, Some(FailureKind::Transform));
    assert!(done.error.as_deref().unwrap_or_default().contains("content policy"));
    assert!(done.staged_ref.is_none());
    assert!(done.processing_time_ms.is_none());

    // One staged output never appeared: only the original is stored.
    assert_eq!(service.artifacts().count().await?, 1);

    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_transform_timeout_fails_the_job() -> Result<(), Box<dyn Error>> {
    let hanging = transform_adapter!("hanging", |image, _style| {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(AdapterResponse::binary(image))
    });
    let config = common::config().with_transform_timeout(Duration::from_millis(100));
    let service = common::service(config, hanging).await?;

    let accepted = service.create_job(request(common::png(48, 48))).await?;
    let done = common::wait_for_job(&service, accepted.job_id).await;

    assert_eq!(done.status, JobState::Failed);
    assert_eq!(done.failure_kind, Some(FailureKind::Timeout));

    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_stale_processing_job_reads_as_failed() -> Result<(), Box<dyn Error>> {
    let config = common::config()
        .with_estimated_seconds(1)
        .with_staleness_multiplier(1.0)
        .with_transform_timeout(Duration::from_millis(500));
    let (service, _dispatcher) = common::held_service(config).await?;

    let accepted = service.create_job(request(common::png(48, 48))).await?;

    // A worker claims the job and then disappears.
    service
        .registry()
        .update(accepted.job_id, JobTransition::start())
        .await?;
    assert_eq!(
        service.get_job(accepted.job_id).await?.status,
        JobState::Processing
    );

    tokio::time::sleep(Duration::from_millis(1200)).await;

    let stale = service.get_job(accepted.job_id).await?;
    assert_eq!(stale.status, JobState::Failed);
    assert_eq!(stale.failure_kind, Some(FailureKind::Stale));
    assert!(stale.error.as_deref().unwrap_or_default().contains("timed out"));

    // A late result cannot undo what clients already saw.
    let late = service
        .registry()
        .update(
            accepted.job_id,
            JobTransition::complete(ArtifactId::new(), 1300, None),
        )
        .await;
    assert!(late.is_err());
    assert_eq!(service.get_job(accepted.job_id).await?, stale);
    Ok(())
}

#[tokio::test]
async fn test_artifacts_round_trip_under_both_encodings() -> Result<(), Box<dyn Error>> {
    // The adapter answers in base64 text without saying so.
    let base64_echo = Arc::new(transform_adapter!("base64-echo", |image, _style| {
        Ok(AdapterResponse::new(STANDARD.encode(&image)))
    }));

    for encoding in [ArtifactEncoding::Raw, ArtifactEncoding::Base64] {
        let config = common::config();
        let registry = StatusRegistry::in_memory(config.staleness());
        let storage = Storage::new(StorageConfig::memory()).await?;
        let artifacts =
            ArtifactStore::new(storage, ArtifactStoreConfig::default().with_encoding(encoding));
        let service =
            StagingService::start(config, registry, artifacts, base64_echo.clone()).await?;

        let upload = common::png(50, 40);
        let accepted = service.create_job(request(upload.clone())).await?;
        let done = common::wait_for_job(&service, accepted.job_id).await;
        assert_eq!(done.status, JobState::Completed, "{:?}", done.error);

        let original = service.get_artifact(done.original_ref.unwrap()).await?;
        assert_eq!(original.bytes, upload);
        assert_eq!(original.content_type, "image/png");

        let staged = service.get_artifact(done.staged_ref.unwrap()).await?;
        assert_eq!(staged.bytes, upload);
        assert_eq!(staged.content_type, "image/png");

        service.shutdown().await;
    }
    Ok(())
}

#[tokio::test]
async fn test_events_follow_the_job() -> Result<(), Box<dyn Error>> {
    let service = common::service(common::config(), common::echo_adapter()).await?;
    let mut events = service.subscribe();

    let accepted = service.create_job(request(common::png(48, 48))).await?;

    let mut seen = Vec::new();
    while seen.len() < 3 {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv()).await??;
        if event.job_id() == Some(accepted.job_id) {
            seen.push(event);
        }
    }
    assert!(matches!(seen[0], JobEvent::JobSubmitted { .. }));
    assert!(matches!(seen[1], JobEvent::JobStarted { .. }));
    match &seen[2] {
        JobEvent::JobCompleted { output, .. } => {
            let view = service.get_job(accepted.job_id).await?;
            assert_eq!(view.staged_ref, Some(*output));
        }
        other => panic!("unexpected event {:?}", other),
    }

    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_unknown_ids_are_not_found() -> Result<(), Box<dyn Error>> {
    let (service, _dispatcher) = common::held_service(common::config()).await?;

    assert!(matches!(
        service.get_job(JobId::new()).await,
        Err(StagingError::NotFound(_))
    ));
    assert!(matches!(
        service.get_batch(BatchId::new()).await,
        Err(StagingError::NotFound(_))
    ));
    assert!(matches!(
        service.get_artifact(ArtifactId::new()).await,
        Err(StagingError::NotFound(_))
    ));
    assert!(matches!(
        parse_job_id("not-a-ulid"),
        Err(StagingError::InvalidId(_))
    ));

    let err = service.get_job(JobId::new()).await.unwrap_err();
    assert!(err.is_client_error());
    Ok(())
}

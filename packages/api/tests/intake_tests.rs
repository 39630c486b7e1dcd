#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};

use actors::{AdapterResponse, transform_adapter};
use api::{
    CreateJobRequest, FailureKind, ImageUpload, JobEvent, JobState, StagingError,
    StagingService, StyleParams,
};
use db::StatusRegistry;
use staging_core::{RateLimitConfig, RateLimitError, ValidationError};
use storage::ArtifactStore;

fn request(bytes: bytes::Bytes) -> CreateJobRequest {
    CreateJobRequest::new(ImageUpload::new(bytes, "image/png"), StyleParams::new("modern"))
}

fn limits(per_identity: u32) -> RateLimitConfig {
    RateLimitConfig {
        per_identity,
        global: 100,
        window: Duration::from_secs(3600),
    }
}

#[tokio::test]
async fn test_create_job_does_not_wait_for_the_transform() -> Result<(), Box<dyn Error>> {
    let slow = transform_adapter!("slow", |image, _style| {
        tokio::time::sleep(Duration::from_secs(3)).await;
        Ok(AdapterResponse::binary(image))
    });
    let service = common::service(common::config(), slow).await?;

    let started = Instant::now();
    let accepted = service.create_job(request(common::png(64, 48))).await?;
    assert!(started.elapsed() < Duration::from_secs(1));

    assert_eq!(accepted.status, JobState::Pending);
    assert_eq!(accepted.estimated_seconds, service.config().estimated_seconds);

    let view = service.get_job(accepted.job_id).await?;
    assert!(matches!(
        view.status,
        JobState::Pending | JobState::Processing
    ));
    assert!(view.original_ref.is_some());
    assert!(view.staged_ref.is_none());

    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_invalid_uploads_create_nothing() -> Result<(), Box<dyn Error>> {
    let config = common::config().with_max_upload_bytes(32 * 1024);
    let (service, dispatcher) = common::held_service(config).await?;

    let cases = vec![
        (
            ImageUpload::new(bytes::Bytes::new(), "image/png"),
            ValidationError::EmptyPayload,
        ),
        (
            ImageUpload::new(vec![0u8; 32 * 1024 + 1], "image/png"),
            ValidationError::TooLarge {
                size: 32 * 1024 + 1,
                max: 32 * 1024,
            },
        ),
        (
            ImageUpload::new(common::png(64, 64), "image/tiff"),
            ValidationError::UnsupportedMediaType("image/tiff".into()),
        ),
        (
            ImageUpload::new(&b"%PDF-1.7 not an image"[..], "image/png"),
            ValidationError::NotAnImage,
        ),
        (
            ImageUpload::new(common::png(31, 200), "image/png"),
            ValidationError::TooSmall {
                width: 31,
                height: 200,
                min: 32,
            },
        ),
    ];

    for (upload, expected) in cases {
        let result = service
            .create_job(CreateJobRequest::new(upload, StyleParams::default()))
            .await;
        match result {
            Err(StagingError::Validation(e)) => assert_eq!(e, expected),
            other => panic!("expected {:?}, got {:?}", expected, other),
        }
    }

    assert_eq!(service.registry().job_count().await?, 0);
    assert_eq!(service.artifacts().count().await?, 0);
    assert!(dispatcher.dispatched.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_rate_limit_rejects_next_job_without_side_effects() -> Result<(), Box<dyn Error>> {
    let config = common::config().with_rate_limit(limits(3));
    let (service, _dispatcher) = common::held_service(config).await?;

    for _ in 0..3 {
        service
            .create_job(request(common::png(40, 40)).with_client_key("10.0.0.7"))
            .await?;
    }

    let result = service
        .create_job(request(common::png(40, 40)).with_client_key("10.0.0.7"))
        .await;
    match result {
        Err(StagingError::RateLimit(RateLimitError::IdentityExhausted { identity, limit })) => {
            assert_eq!(identity, "10.0.0.7");
            assert_eq!(limit, 3);
        }
        other => panic!("expected a rate limit error, got {:?}", other),
    }

    assert_eq!(service.registry().job_count().await?, 3);
    assert_eq!(service.artifacts().count().await?, 3);

    let usage = service.usage("10.0.0.7").unwrap();
    assert_eq!(usage.user_used, 3);
    assert_eq!(usage.user_remaining, 0);
    assert_eq!(usage.global_used, 3);

    // Other callers are unaffected.
    service
        .create_job(request(common::png(40, 40)).with_client_key("10.0.0.8"))
        .await?;
    Ok(())
}

#[tokio::test]
async fn test_owner_is_the_identity_without_a_client_key() -> Result<(), Box<dyn Error>> {
    let config = common::config().with_rate_limit(limits(1));
    let (service, _dispatcher) = common::held_service(config).await?;

    service
        .create_job(request(common::png(40, 40)).with_owner("user-1"))
        .await?;
    let second = service
        .create_job(request(common::png(40, 40)).with_owner("user-1"))
        .await;
    assert!(matches!(second, Err(StagingError::RateLimit(_))));
    assert_eq!(service.usage("user-1").unwrap().user_used, 1);
    assert!(service.usage("anonymous").is_some());
    Ok(())
}

#[tokio::test]
async fn test_failed_dispatch_rolls_back_intake() -> Result<(), Box<dyn Error>> {
    let config = common::config().with_rate_limit(limits(1));
    let registry = StatusRegistry::in_memory(config.staleness());
    let artifacts = ArtifactStore::in_memory().await?;
    let service = StagingService::with_dispatcher(
        config,
        registry,
        artifacts,
        Arc::new(common::FailingDispatcher),
    )?;
    let mut events = service.subscribe();

    let result = service
        .create_job(request(common::png(40, 40)).with_client_key("10.0.0.9"))
        .await;
    assert!(matches!(result, Err(StagingError::Dispatch(_))));

    assert_eq!(service.registry().job_count().await?, 0);
    assert_eq!(service.artifacts().count().await?, 0);
    assert_eq!(service.usage("10.0.0.9").unwrap().user_used, 0);

    // Subscribers that saw the job arrive also see it go.
    let announced = match events.try_recv()? {
        JobEvent::JobSubmitted { job, .. } => job.id,
        other => panic!("unexpected event {:?}", other),
    };
    match events.try_recv()? {
        JobEvent::JobFailed { job_id, kind, .. } => {
            assert_eq!(job_id, announced);
            assert_eq!(kind, FailureKind::Internal);
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(events.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn test_accepted_jobs_are_announced() -> Result<(), Box<dyn Error>> {
    let (service, dispatcher) = common::held_service(common::config()).await?;
    let mut events = service.subscribe();

    let accepted = service
        .create_job(request(common::png(40, 40)).with_owner("user-2"))
        .await?;

    match events.recv().await? {
        JobEvent::JobSubmitted { job, .. } => {
            assert_eq!(job.id, accepted.job_id);
            assert_eq!(job.owner_id.as_deref(), Some("user-2"));
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(*dispatcher.dispatched.lock().unwrap(), vec![accepted.job_id]);
    Ok(())
}

#[tokio::test]
async fn test_rate_limiting_is_off_by_default() -> Result<(), Box<dyn Error>> {
    let (service, _dispatcher) = common::held_service(common::config()).await?;
    for _ in 0..12 {
        service.create_job(request(common::png(32, 32))).await?;
    }
    assert!(service.usage("anonymous").is_none());
    Ok(())
}

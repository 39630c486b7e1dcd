//! Service initialization from the environment.

use std::sync::Arc;

use actors::TransformAdapter;
use db::{DbConfig, StatusRegistry};
use staging_core::StagingConfig;
use storage::ArtifactStore;

use crate::error::Result;
use crate::service::StagingService;

/// Build the staging service from environment variables.
///
/// This should be called once at server startup before handling requests.
pub async fn init_staging(adapter: Arc<dyn TransformAdapter>) -> Result<StagingService> {
    tracing::info!("Initializing staging service...");

    let config = StagingConfig::from_env()?;

    let db_config = DbConfig::from_env();
    tracing::info!("Connecting job registry to {}", db_config.endpoint);
    let registry = StatusRegistry::surreal(&db_config, config.staleness()).await?;

    let artifacts = ArtifactStore::from_env().await?;
    match artifacts.config().ttl {
        Some(ttl) => tracing::info!("Artifacts expire after {}s", ttl.as_secs()),
        None => tracing::info!("Artifacts are retained until deleted"),
    }

    if let Some(limits) = &config.rate_limit {
        tracing::info!(
            "Rate limiting enabled: {} per identity, {} global",
            limits.per_identity,
            limits.global
        );
    }

    let service = StagingService::start(config, registry, artifacts, adapter).await?;
    tracing::info!("Staging service initialized");
    Ok(service)
}

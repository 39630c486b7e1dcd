use std::sync::Arc;

use staging_core::{ArtifactId, Job, StalenessPolicy, StyleParams};

use db::{DbConfig, DbError, MemoryJobStore, StatusRegistry, SurrealJobStore};

/// A registry on a fresh in-memory SurrealDB instance.
pub async fn surreal_registry() -> Result<StatusRegistry, DbError> {
    let store = SurrealJobStore::connect(&DbConfig::memory()).await?;
    Ok(StatusRegistry::new(Arc::new(store), StalenessPolicy::default()))
}

pub fn memory_registry() -> StatusRegistry {
    StatusRegistry::new(Arc::new(MemoryJobStore::new()), StalenessPolicy::default())
}

/// Both backends, so every scenario runs against each.
pub async fn registries() -> Result<Vec<StatusRegistry>, DbError> {
    Ok(vec![memory_registry(), surreal_registry().await?])
}

pub fn pending_job() -> Job {
    Job::new(ArtifactId::new(), StyleParams::default()).with_owner(Some("owner-1".into()))
}

//! Object storage for staging artifacts.
//!
//! Backends:
//! - S3-compatible storage in production/staging
//! - On-disk storage for local dev
//! - In-memory storage for tests
//!
//! `Storage` is a thin key/value wrapper around `object_store`; `ArtifactStore`
//! layers artifact metadata, expiry and transport encoding on top of it.

mod artifact;

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::TryStreamExt;
use object_store::ObjectStore;
use object_store::ObjectStoreExt;
use object_store::path::Path;
use staging_core::config::non_empty;

pub use artifact::{
    Artifact, ArtifactEncoding, ArtifactMeta, ArtifactStore, ArtifactStoreConfig,
};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage config: {0}")]
    InvalidConfig(String),

    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("corrupt artifact {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object_store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StorageError {
    /// True when the underlying object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::NotFound(_)
                | StorageError::ObjectStore(object_store::Error::NotFound { .. })
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    S3,
    Filesystem,
    Memory,
}

impl StorageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageKind::S3 => "s3",
            StorageKind::Filesystem => "filesystem",
            StorageKind::Memory => "memory",
        }
    }
}

/// S3-compatible bucket settings.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for MinIO and other S3-compatible services.
    pub endpoint: Option<String>,
    pub allow_http: bool,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

#[derive(Debug, Clone)]
pub enum StorageBackendConfig {
    S3(S3Config),
    Filesystem { root: PathBuf },
    Memory,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackendConfig,
    /// Optional key prefix applied to all object keys.
    pub prefix: Option<String>,
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self {
            backend: StorageBackendConfig::Memory,
            prefix: None,
        }
    }

    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: StorageBackendConfig::Filesystem { root: root.into() },
            prefix: None,
        }
    }

    pub fn s3(cfg: S3Config) -> Self {
        Self {
            backend: StorageBackendConfig::S3(cfg),
            prefix: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = non_empty(prefix.into());
        self
    }

    /// Build a config from environment variables.
    ///
    /// - `STORAGE_BACKEND`: `s3`, `filesystem` or `memory` (default memory, uploads
    ///   are ephemeral)
    /// - `STORAGE_PREFIX`: optional key prefix, e.g. `staging/`
    /// - `STORAGE_FS_ROOT`: filesystem root (default `./data/artifacts`)
    /// - `S3_BUCKET` (required for s3), `AWS_REGION` (default `us-east-1`)
    /// - `S3_ENDPOINT`, `S3_ALLOW_HTTP` (default true for `http://` endpoints)
    /// - `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`
    pub fn from_env() -> Result<Self, StorageError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StorageError> {
        let get = |key: &str| lookup(key).and_then(non_empty);

        let cfg = match get("STORAGE_BACKEND").as_deref() {
            Some("s3") => Self::s3(s3_config(&get)?),
            Some("filesystem") | Some("fs") => Self::filesystem(
                get("STORAGE_FS_ROOT").unwrap_or_else(|| "./data/artifacts".to_string()),
            ),
            Some("memory") | Some("mem") | None => Self::memory(),
            Some(other) => {
                return Err(StorageError::InvalidConfig(format!(
                    "unsupported STORAGE_BACKEND={other} (expected s3|filesystem|memory)"
                )));
            }
        };

        Ok(Self {
            prefix: get("STORAGE_PREFIX"),
            ..cfg
        })
    }
}

#[derive(Clone)]
pub struct Storage {
    kind: StorageKind,
    store: Arc<dyn ObjectStore>,
    prefix: Option<String>,
}

impl Storage {
    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    pub fn kind_str(&self) -> &'static str {
        self.kind.as_str()
    }

    pub async fn new(cfg: StorageConfig) -> Result<Self, StorageError> {
        let (kind, store) = match cfg.backend {
            StorageBackendConfig::S3(s3) => (StorageKind::S3, Arc::new(build_s3(s3)?) as _),
            StorageBackendConfig::Filesystem { root } => {
                ensure_dir(&root)?;
                let fs = object_store::local::LocalFileSystem::new_with_prefix(&root)?;
                (StorageKind::Filesystem, Arc::new(fs) as _)
            }
            StorageBackendConfig::Memory => {
                let mem = object_store::memory::InMemory::new();
                (StorageKind::Memory, Arc::new(mem) as _)
            }
        };

        tracing::info!("Using {} artifact storage", kind.as_str());

        Ok(Self {
            kind,
            store,
            prefix: cfg.prefix.and_then(non_empty),
        })
    }

    pub async fn from_env() -> Result<Self, StorageError> {
        Self::new(StorageConfig::from_env()?).await
    }

    fn prefix(&self) -> Option<&str> {
        self.prefix
            .as_deref()
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
    }

    fn to_path(&self, key: &str) -> Result<Path, StorageError> {
        let key = key.trim_start_matches('/');
        if key.is_empty() {
            return Err(StorageError::InvalidConfig(
                "object key must not be empty".to_string(),
            ));
        }

        let joined = match self.prefix() {
            Some(prefix) => format!("{prefix}/{key}"),
            None => key.to_string(),
        };

        Ok(Path::from(joined))
    }

    /// Map a stored location back to the key it was written under.
    fn to_key(&self, location: &Path) -> String {
        let raw: &str = location.as_ref();
        match self.prefix() {
            Some(prefix) => raw
                .strip_prefix(prefix)
                .map(|rest| rest.trim_start_matches('/'))
                .unwrap_or(raw)
                .to_string(),
            None => raw.to_string(),
        }
    }

    pub async fn put_bytes(&self, key: &str, bytes: Bytes) -> Result<(), StorageError> {
        let path = self.to_path(key)?;
        self.store
            .put(&path, object_store::PutPayload::from(bytes))
            .await?;
        Ok(())
    }

    pub async fn get_bytes(&self, key: &str) -> Result<Bytes, StorageError> {
        let path = self.to_path(key)?;
        let res = self.store.get(&path).await?;
        Ok(res.bytes().await?)
    }

    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.to_path(key)?;
        self.store.delete(&path).await?;
        Ok(())
    }

    /// Keys stored under `prefix`, relative to the storage prefix.
    pub async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let path = self.to_path(prefix)?;
        let metas: Vec<object_store::ObjectMeta> =
            match self.store.list(Some(&path)).try_collect().await {
                Ok(metas) => metas,
                Err(object_store::Error::NotFound { .. }) => Vec::new(),
                Err(e) => return Err(e.into()),
            };
        Ok(metas.iter().map(|m| self.to_key(&m.location)).collect())
    }

    pub async fn put_json_value(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(value)?;
        self.put_bytes(key, Bytes::from(bytes)).await
    }

    pub async fn get_json_value(&self, key: &str) -> Result<serde_json::Value, StorageError> {
        let bytes = self.get_bytes(key).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn ensure_dir(root: &FsPath) -> Result<(), StorageError> {
    std::fs::create_dir_all(root)?;
    Ok(())
}

fn s3_config(get: &impl Fn(&str) -> Option<String>) -> Result<S3Config, StorageError> {
    let bucket = get("S3_BUCKET").ok_or_else(|| {
        StorageError::InvalidConfig("S3_BUCKET is required for s3 backend".into())
    })?;
    let endpoint = get("S3_ENDPOINT");

    let allow_http = match get("S3_ALLOW_HTTP") {
        Some(v) => match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            _ => {
                return Err(StorageError::InvalidConfig(format!(
                    "invalid boolean for S3_ALLOW_HTTP={v}"
                )));
            }
        },
        None => endpoint
            .as_deref()
            .is_some_and(|e| e.trim_start().to_ascii_lowercase().starts_with("http://")),
    };

    Ok(S3Config {
        bucket,
        region: get("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string()),
        endpoint,
        allow_http,
        access_key_id: get("AWS_ACCESS_KEY_ID"),
        secret_access_key: get("AWS_SECRET_ACCESS_KEY"),
    })
}

fn build_s3(cfg: S3Config) -> Result<object_store::aws::AmazonS3, StorageError> {
    let mut builder = object_store::aws::AmazonS3Builder::new()
        .with_bucket_name(cfg.bucket)
        .with_region(cfg.region)
        .with_allow_http(cfg.allow_http);

    if let Some(endpoint) = cfg.endpoint {
        builder = builder.with_endpoint(endpoint);
    }
    if let Some(access_key_id) = cfg.access_key_id {
        builder = builder.with_access_key_id(access_key_id);
    }
    if let Some(secret_access_key) = cfg.secret_access_key {
        builder = builder.with_secret_access_key(secret_access_key);
    }

    Ok(builder.build()?)
}

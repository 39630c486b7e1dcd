//! Artifact store: image payloads addressed by id, with optional expiry.
//!
//! Each artifact is two objects:
//! - `artifacts/{id}.bin` holds the payload (raw or base64 text)
//! - `artifacts/{id}.meta.json` holds [`ArtifactMeta`]
//!
//! The metadata object is written last and removed first, so an artifact
//! without metadata does not exist as far as readers are concerned.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use staging_core::config::non_empty;
use staging_core::{ArtifactId, ArtifactKind};
use tokio::task::JoinHandle;

use crate::{Storage, StorageError};

const ARTIFACT_PREFIX: &str = "artifacts";
const DATA_SUFFIX: &str = ".bin";
const META_SUFFIX: &str = ".meta.json";

/// How payload bytes are laid out in the backing store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactEncoding {
    /// Bytes are stored as given.
    #[default]
    Raw,
    /// Bytes are stored as standard base64 text.
    Base64,
}

impl ArtifactEncoding {
    fn encode(self, bytes: Bytes) -> Bytes {
        match self {
            ArtifactEncoding::Raw => bytes,
            ArtifactEncoding::Base64 => Bytes::from(BASE64.encode(&bytes)),
        }
    }

    fn decode(self, stored: Bytes) -> Result<Bytes, String> {
        match self {
            ArtifactEncoding::Raw => Ok(stored),
            ArtifactEncoding::Base64 => BASE64
                .decode(&stored)
                .map(Bytes::from)
                .map_err(|e| e.to_string()),
        }
    }
}

impl std::str::FromStr for ArtifactEncoding {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" | "binary" => Ok(ArtifactEncoding::Raw),
            "base64" => Ok(ArtifactEncoding::Base64),
            other => Err(StorageError::InvalidConfig(format!(
                "unsupported ARTIFACT_ENCODING={other} (expected raw|base64)"
            ))),
        }
    }
}

/// Everything known about an artifact except its bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub id: ArtifactId,
    pub kind: ArtifactKind,
    pub content_type: String,
    /// Size of the decoded payload in bytes.
    pub size: usize,
    pub encoding: ArtifactEncoding,
    pub created_at: DateTime<Utc>,
    /// `None` means the artifact is retained until deleted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ArtifactMeta {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// A stored artifact with its decoded bytes.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub meta: ArtifactMeta,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactStoreConfig {
    /// Lifetime of new artifacts. `None` retains them until deleted.
    pub ttl: Option<Duration>,
    /// Layout used for new artifacts. Existing artifacts keep theirs.
    pub encoding: ArtifactEncoding,
    /// How often the background sweeper removes expired artifacts.
    pub sweep_interval: Duration,
}

impl Default for ArtifactStoreConfig {
    fn default() -> Self {
        Self {
            ttl: Some(Duration::from_secs(24 * 60 * 60)),
            encoding: ArtifactEncoding::Raw,
            sweep_interval: Duration::from_secs(10 * 60),
        }
    }
}

impl ArtifactStoreConfig {
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_encoding(mut self, encoding: ArtifactEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }

    /// Build a config from environment variables.
    ///
    /// - `ARTIFACT_TTL_SECS` (default 86400, `0` retains artifacts forever)
    /// - `ARTIFACT_ENCODING` (`raw` or `base64`, default raw)
    /// - `ARTIFACT_SWEEP_SECS` (default 600)
    pub fn from_env() -> Result<Self, StorageError> {
        let defaults = Self::default();
        let get = |key: &str| std::env::var(key).ok().and_then(non_empty);

        let ttl = match get("ARTIFACT_TTL_SECS") {
            None => defaults.ttl,
            Some(v) => match parse_secs("ARTIFACT_TTL_SECS", &v)? {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        };
        let encoding = match get("ARTIFACT_ENCODING") {
            None => defaults.encoding,
            Some(v) => v.parse()?,
        };
        let sweep_interval = match get("ARTIFACT_SWEEP_SECS") {
            None => defaults.sweep_interval,
            Some(v) => Duration::from_secs(parse_secs("ARTIFACT_SWEEP_SECS", &v)?.max(1)),
        };

        Ok(Self {
            ttl,
            encoding,
            sweep_interval,
        })
    }
}

fn parse_secs(var: &str, value: &str) -> Result<u64, StorageError> {
    value
        .parse()
        .map_err(|_| StorageError::InvalidConfig(format!("invalid value for {var}: {value}")))
}

fn data_key(id: ArtifactId) -> String {
    format!("{ARTIFACT_PREFIX}/{id}{DATA_SUFFIX}")
}

fn meta_key(id: ArtifactId) -> String {
    format!("{ARTIFACT_PREFIX}/{id}{META_SUFFIX}")
}

/// Content-addressed-by-id store for original and staged images.
#[derive(Clone)]
pub struct ArtifactStore {
    storage: Storage,
    config: ArtifactStoreConfig,
}

impl ArtifactStore {
    pub fn new(storage: Storage, config: ArtifactStoreConfig) -> Self {
        Self { storage, config }
    }

    /// In-memory store with default settings, for tests and local runs.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let storage = Storage::new(crate::StorageConfig::memory()).await?;
        Ok(Self::new(storage, ArtifactStoreConfig::default()))
    }

    pub async fn from_env() -> Result<Self, StorageError> {
        let storage = Storage::from_env().await?;
        Ok(Self::new(storage, ArtifactStoreConfig::from_env()?))
    }

    pub fn config(&self) -> &ArtifactStoreConfig {
        &self.config
    }

    /// Store a payload under a fresh id.
    pub async fn put(
        &self,
        kind: ArtifactKind,
        content_type: &str,
        bytes: Bytes,
    ) -> Result<ArtifactMeta, StorageError> {
        let id = ArtifactId::new();
        let created_at = Utc::now();
        let expires_at = self
            .config
            .ttl
            .and_then(|ttl| TimeDelta::from_std(ttl).ok())
            .and_then(|ttl| created_at.checked_add_signed(ttl));

        let meta = ArtifactMeta {
            id,
            kind,
            content_type: content_type.to_string(),
            size: bytes.len(),
            encoding: self.config.encoding,
            created_at,
            expires_at,
        };

        self.storage
            .put_bytes(&data_key(id), meta.encoding.encode(bytes))
            .await?;
        self.storage
            .put_json_value(&meta_key(id), &serde_json::to_value(&meta)?)
            .await?;

        tracing::debug!("Stored {} artifact {} ({} bytes)", kind, id, meta.size);
        Ok(meta)
    }

    pub async fn head(&self, id: ArtifactId) -> Result<ArtifactMeta, StorageError> {
        self.head_at(id, Utc::now()).await
    }

    /// Metadata as of `now`; expired artifacts read as not found.
    pub async fn head_at(
        &self,
        id: ArtifactId,
        now: DateTime<Utc>,
    ) -> Result<ArtifactMeta, StorageError> {
        let meta = self.read_meta(id).await?;
        if meta.is_expired(now) {
            return Err(StorageError::NotFound(id.to_string()));
        }
        Ok(meta)
    }

    pub async fn get(&self, id: ArtifactId) -> Result<Artifact, StorageError> {
        self.get_at(id, Utc::now()).await
    }

    pub async fn get_at(&self, id: ArtifactId, now: DateTime<Utc>) -> Result<Artifact, StorageError> {
        let meta = self.head_at(id, now).await?;

        let stored = self
            .storage
            .get_bytes(&data_key(id))
            .await
            .map_err(|e| not_found_as(e, id))?;
        let bytes = meta
            .encoding
            .decode(stored)
            .map_err(|reason| StorageError::Corrupt {
                id: id.to_string(),
                reason,
            })?;

        if bytes.len() != meta.size {
            return Err(StorageError::Corrupt {
                id: id.to_string(),
                reason: format!("expected {} bytes, found {}", meta.size, bytes.len()),
            });
        }

        Ok(Artifact { meta, bytes })
    }

    /// Remove an artifact. Missing artifacts are not an error.
    pub async fn delete(&self, id: ArtifactId) -> Result<(), StorageError> {
        for key in [meta_key(id), data_key(id)] {
            match self.storage.delete(&key).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        tracing::debug!("Deleted artifact {}", id);
        Ok(())
    }

    /// Number of committed artifacts, expired or not.
    pub async fn count(&self) -> Result<usize, StorageError> {
        Ok(self.meta_ids().await?.len())
    }

    /// Delete every artifact expired as of `now`, returning how many went.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut removed = 0;
        for id in self.meta_ids().await? {
            let meta = match self.read_meta(id).await {
                Ok(meta) => meta,
                Err(e) if e.is_not_found() => continue,
                Err(e) => {
                    tracing::warn!("Skipping unreadable artifact {}: {}", id, e);
                    continue;
                }
            };
            if meta.is_expired(now) {
                self.delete(id).await?;
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!("Swept {} expired artifacts", removed);
        }
        Ok(removed)
    }

    /// Run `sweep_expired` on the configured interval.
    ///
    /// Returns `None` when artifacts never expire.
    pub fn spawn_sweeper(&self) -> Option<JoinHandle<()>> {
        self.config.ttl?;

        let store = self.clone();
        let period = self.config.sweep_interval;
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = store.sweep_expired(Utc::now()).await {
                    tracing::warn!("Artifact sweep failed: {}", e);
                }
            }
        }))
    }

    async fn read_meta(&self, id: ArtifactId) -> Result<ArtifactMeta, StorageError> {
        let value = self
            .storage
            .get_json_value(&meta_key(id))
            .await
            .map_err(|e| not_found_as(e, id))?;
        Ok(serde_json::from_value(value)?)
    }

    async fn meta_ids(&self) -> Result<Vec<ArtifactId>, StorageError> {
        let keys = self.storage.list_keys(ARTIFACT_PREFIX).await?;
        Ok(keys
            .iter()
            .filter_map(|key| {
                let name = key.rsplit('/').next()?;
                let id = name.strip_suffix(META_SUFFIX)?;
                ArtifactId::parse(id).ok()
            })
            .collect())
    }
}

fn not_found_as(err: StorageError, id: ArtifactId) -> StorageError {
    if err.is_not_found() {
        StorageError::NotFound(id.to_string())
    } else {
        err
    }
}

//! Runtime configuration for intake, executors and rate limiting.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::job::{DEFAULT_ESTIMATED_SECONDS, StalenessPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value}")]
    InvalidValue { var: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Limits for the optional rate limiter.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Jobs allowed per identity within the window.
    pub per_identity: u32,
    /// Jobs allowed across all identities within the window.
    pub global: u32,
    /// Length of the sliding window.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_identity: 10,
            global: 30,
            window: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Configuration for the staging pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct StagingConfig {
    /// Largest accepted upload in bytes.
    pub max_upload_bytes: usize,
    /// Accepted mime types.
    pub supported_mime_types: Vec<String>,
    /// Minimum width and height of an uploaded image.
    pub min_dimension: u32,
    /// Largest batch accepted by the batch coordinator.
    pub max_batch_size: usize,
    /// Estimate reported to clients and used for staleness.
    pub estimated_seconds: u64,
    /// Processing jobs older than `estimated_seconds * staleness_multiplier` read as failed.
    pub staleness_multiplier: f64,
    /// Hard timeout for a single AI transform call.
    pub transform_timeout: Duration,
    /// Number of transforms allowed in flight at once.
    pub max_concurrent_jobs: usize,
    /// `None` disables rate limiting.
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 10 * 1024 * 1024,
            supported_mime_types: vec![
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "image/webp".to_string(),
            ],
            min_dimension: 512,
            max_batch_size: 10,
            estimated_seconds: DEFAULT_ESTIMATED_SECONDS,
            staleness_multiplier: 2.0,
            transform_timeout: Duration::from_secs(45),
            max_concurrent_jobs: 5,
            rate_limit: None,
        }
    }
}

impl StagingConfig {
    pub fn with_max_upload_bytes(mut self, max_upload_bytes: usize) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }

    pub fn with_min_dimension(mut self, min_dimension: u32) -> Self {
        self.min_dimension = min_dimension;
        self
    }

    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    pub fn with_estimated_seconds(mut self, estimated_seconds: u64) -> Self {
        self.estimated_seconds = estimated_seconds;
        self
    }

    pub fn with_staleness_multiplier(mut self, multiplier: f64) -> Self {
        self.staleness_multiplier = multiplier;
        self
    }

    pub fn with_transform_timeout(mut self, timeout: Duration) -> Self {
        self.transform_timeout = timeout;
        self
    }

    pub fn with_max_concurrent_jobs(mut self, max_concurrent_jobs: usize) -> Self {
        self.max_concurrent_jobs = max_concurrent_jobs;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    pub fn staleness(&self) -> StalenessPolicy {
        StalenessPolicy::new(self.staleness_multiplier)
    }

    pub fn is_supported_mime(&self, content_type: &str) -> bool {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        self.supported_mime_types.iter().any(|m| *m == essence)
    }

    /// Reject settings that would make healthy jobs read as stale.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_jobs == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_jobs must be at least 1".into(),
            ));
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "max_batch_size must be at least 1".into(),
            ));
        }
        if self.staleness_multiplier.is_nan() || self.staleness_multiplier <= 0.0 {
            return Err(ConfigError::Invalid(
                "staleness_multiplier must be positive".into(),
            ));
        }

        let staleness_secs = self.estimated_seconds as f64 * self.staleness_multiplier;
        if self.transform_timeout.as_secs_f64() >= staleness_secs {
            return Err(ConfigError::Invalid(format!(
                "transform timeout ({}s) must be below the staleness bound ({}s)",
                self.transform_timeout.as_secs_f64(),
                staleness_secs
            )));
        }

        Ok(())
    }

    /// Build a config from environment variables.
    ///
    /// - `MAX_UPLOAD_SIZE` bytes (default 10 MiB)
    /// - `MIN_IMAGE_DIMENSION` pixels (default 512)
    /// - `MAX_BATCH_SIZE` (default 10)
    /// - `ESTIMATED_JOB_SECONDS` (default 25)
    /// - `STALENESS_MULTIPLIER` (default 2.0)
    /// - `AI_TIMEOUT_SECONDS` (default 45)
    /// - `MAX_CONCURRENT_JOBS` (default 5)
    /// - `RATE_LIMIT_ENABLED` (`true`/`false`, default false)
    /// - `RATE_LIMIT_USER_DAILY` (default 10), `RATE_LIMIT_GLOBAL_DAILY` (default 30)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).and_then(non_empty);

        let rate_limit = if parse_bool(&get, "RATE_LIMIT_ENABLED")?.unwrap_or(false) {
            let base = RateLimitConfig::default();
            Some(RateLimitConfig {
                per_identity: parse(&get, "RATE_LIMIT_USER_DAILY")?.unwrap_or(base.per_identity),
                global: parse(&get, "RATE_LIMIT_GLOBAL_DAILY")?.unwrap_or(base.global),
                window: base.window,
            })
        } else {
            None
        };

        let cfg = Self {
            max_upload_bytes: parse(&get, "MAX_UPLOAD_SIZE")?.unwrap_or(defaults.max_upload_bytes),
            supported_mime_types: defaults.supported_mime_types,
            min_dimension: parse(&get, "MIN_IMAGE_DIMENSION")?.unwrap_or(defaults.min_dimension),
            max_batch_size: parse(&get, "MAX_BATCH_SIZE")?.unwrap_or(defaults.max_batch_size),
            estimated_seconds: parse(&get, "ESTIMATED_JOB_SECONDS")?
                .unwrap_or(defaults.estimated_seconds),
            staleness_multiplier: parse(&get, "STALENESS_MULTIPLIER")?
                .unwrap_or(defaults.staleness_multiplier),
            transform_timeout: parse(&get, "AI_TIMEOUT_SECONDS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.transform_timeout),
            max_concurrent_jobs: parse(&get, "MAX_CONCURRENT_JOBS")?
                .unwrap_or(defaults.max_concurrent_jobs),
            rate_limit,
        };

        cfg.validate()?;
        Ok(cfg)
    }
}

/// Trim a value, mapping blank strings to `None`.
pub fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    var: &str,
) -> Result<Option<T>, ConfigError> {
    match get(var) {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                var: var.to_string(),
                value,
            }),
    }
}

fn parse_bool(
    get: &impl Fn(&str) -> Option<String>,
    var: &str,
) -> Result<Option<bool>, ConfigError> {
    let Some(value) = get(var) else {
        return Ok(None);
    };

    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => Ok(Some(true)),
        "0" | "false" | "no" | "n" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidValue {
            var: var.to_string(),
            value,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = StagingConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, StagingConfig::default());
        assert!(cfg.rate_limit.is_none());
    }

    #[test]
    fn reads_overrides_and_rate_limits() {
        let cfg = StagingConfig::from_lookup(lookup(&[
            ("MAX_UPLOAD_SIZE", "2048"),
            ("MAX_CONCURRENT_JOBS", "2"),
            ("RATE_LIMIT_ENABLED", "true"),
            ("RATE_LIMIT_USER_DAILY", "3"),
        ]))
        .unwrap();
        assert_eq!(cfg.max_upload_bytes, 2048);
        assert_eq!(cfg.max_concurrent_jobs, 2);
        let limits = cfg.rate_limit.unwrap();
        assert_eq!(limits.per_identity, 3);
        assert_eq!(limits.global, 30);
    }

    #[test]
    fn rejects_garbage_and_unsafe_timeouts() {
        assert!(matches!(
            StagingConfig::from_lookup(lookup(&[("MAX_BATCH_SIZE", "lots")])),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            StagingConfig::from_lookup(lookup(&[("AI_TIMEOUT_SECONDS", "60")])),
            Err(ConfigError::Invalid(_))
        ));
        for multiplier in [0.0, -1.0, f64::NAN] {
            let cfg = StagingConfig::default().with_staleness_multiplier(multiplier);
            assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
        }
    }

    #[test]
    fn mime_check_ignores_parameters_and_case() {
        let cfg = StagingConfig::default();
        assert!(cfg.is_supported_mime("image/PNG"));
        assert!(cfg.is_supported_mime("image/jpeg; charset=binary"));
        assert!(!cfg.is_supported_mime("image/gif"));
    }
}

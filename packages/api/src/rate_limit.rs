//! Sliding-window rate limiting for job submission.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use staging_core::{RateLimitConfig, RateLimitError};
use tokio::task::JoinHandle;

/// Identity used when a request carries neither a client key nor an owner.
pub const ANONYMOUS: &str = "anonymous";

/// Bounds on how often idle identities are dropped.
const MIN_PURGE_INTERVAL: Duration = Duration::from_secs(1);
const MAX_PURGE_INTERVAL: Duration = Duration::from_secs(600);

/// Pick the rate-limit identity for a request.
pub fn identity_for(client_key: Option<&str>, owner_id: Option<&str>) -> String {
    [client_key, owner_id]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or(ANONYMOUS)
        .to_string()
}

/// Usage of both caps for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageStats {
    pub identity: String,
    pub user_used: u32,
    pub user_remaining: u32,
    pub user_limit: u32,
    pub global_used: u32,
    pub global_remaining: u32,
    pub global_limit: u32,
    pub window_seconds: u64,
}

#[derive(Default)]
struct Windows {
    per_identity: HashMap<String, VecDeque<Instant>>,
    global: VecDeque<Instant>,
}

fn prune(queue: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&front) = queue.front() {
        if now.saturating_duration_since(front) >= window {
            queue.pop_front();
        } else {
            break;
        }
    }
}

fn live(queue: &VecDeque<Instant>, now: Instant, window: Duration) -> u32 {
    queue
        .iter()
        .filter(|&&t| now.saturating_duration_since(t) < window)
        .count() as u32
}

/// Per-identity and global caps over a sliding window.
///
/// Every check-and-record happens under one lock, so two callers can never
/// both take the last slot.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<Windows>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(Windows::default()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Whether one more job would be allowed, and how many remain.
    pub fn check(&self, identity: &str) -> (bool, u32) {
        self.check_at(identity, Instant::now())
    }

    pub fn check_at(&self, identity: &str, now: Instant) -> (bool, u32) {
        let usage = self.usage_at(identity, now);
        let remaining = usage.user_remaining.min(usage.global_remaining);
        (remaining > 0, remaining)
    }

    /// Record `n` uses for `identity` if both caps allow all of them.
    pub fn try_acquire(&self, identity: &str, n: u32) -> Result<(), RateLimitError> {
        self.try_acquire_at(identity, n, Instant::now())
    }

    pub fn try_acquire_at(&self, identity: &str, n: u32, now: Instant) -> Result<(), RateLimitError> {
        let window = self.config.window;
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);

        prune(&mut windows.global, now, window);
        if windows.global.len() as u64 + n as u64 > self.config.global as u64 {
            tracing::warn!("Global rate limit reached ({})", self.config.global);
            return Err(RateLimitError::GlobalExhausted {
                limit: self.config.global,
            });
        }

        let queue = windows.per_identity.entry(identity.to_string()).or_default();
        prune(queue, now, window);
        if queue.len() as u64 + n as u64 > self.config.per_identity as u64 {
            tracing::warn!("Rate limit reached for {}", identity);
            return Err(RateLimitError::IdentityExhausted {
                identity: identity.to_string(),
                limit: self.config.per_identity,
            });
        }

        for _ in 0..n {
            queue.push_back(now);
        }
        for _ in 0..n {
            windows.global.push_back(now);
        }
        Ok(())
    }

    /// Give back `n` uses recorded by an intake that did not go through.
    pub fn release(&self, identity: &str, n: u32) {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(queue) = windows.per_identity.get_mut(identity) {
            for _ in 0..n {
                queue.pop_back();
            }
            if queue.is_empty() {
                windows.per_identity.remove(identity);
            }
        }
        for _ in 0..n {
            windows.global.pop_back();
        }
        tracing::debug!("Released {} rate limit slots for {}", n, identity);
    }

    pub fn usage(&self, identity: &str) -> UsageStats {
        self.usage_at(identity, Instant::now())
    }

    pub fn usage_at(&self, identity: &str, now: Instant) -> UsageStats {
        let window = self.config.window;
        let windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);

        let user_used = windows
            .per_identity
            .get(identity)
            .map(|q| live(q, now, window))
            .unwrap_or(0);
        let global_used = live(&windows.global, now, window);

        UsageStats {
            identity: identity.to_string(),
            user_used,
            user_remaining: self.config.per_identity.saturating_sub(user_used),
            user_limit: self.config.per_identity,
            global_used,
            global_remaining: self.config.global.saturating_sub(global_used),
            global_limit: self.config.global,
            window_seconds: window.as_secs(),
        }
    }

    /// Drop identities with no uses left in the window.
    pub fn purge(&self) -> usize {
        self.purge_at(Instant::now())
    }

    /// Returns how many identities were dropped.
    pub fn purge_at(&self, now: Instant) -> usize {
        let window = self.config.window;
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let before = windows.per_identity.len();
        for queue in windows.per_identity.values_mut() {
            prune(queue, now, window);
        }
        windows.per_identity.retain(|_, queue| !queue.is_empty());
        prune(&mut windows.global, now, window);
        before - windows.per_identity.len()
    }

    /// Number of identities currently holding a window.
    pub fn tracked_identities(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .per_identity
            .len()
    }

    /// Run `purge` once per window, between one second and ten minutes apart.
    pub fn spawn_purger(self: &Arc<Self>) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        let period = self
            .config
            .window
            .clamp(MIN_PURGE_INTERVAL, MAX_PURGE_INTERVAL);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let dropped = limiter.purge();
                if dropped > 0 {
                    tracing::debug!("Dropped {} idle rate limit identities", dropped);
                }
            }
        })
    }
}

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sliding window in-memory rate limiter (pod local). Keys are caller
/// MIDs rather than IPs: identity is anonymous but stable, and NAT'd
/// campuses would otherwise share one bucket.
#[derive(Clone)]
pub struct InMemoryRateLimiter {
    store: Arc<DashMap<String, VecDeque<Instant>>>,
    pub enabled: bool,
}

impl InMemoryRateLimiter {
    pub fn new(enabled: bool) -> Self {
        Self {
            store: Arc::new(DashMap::new()),
            enabled,
        }
    }

    /// Returns true if allowed, false if limited.
    pub fn check(&self, key: &str, limit: usize, window: Duration) -> bool {
        if !self.enabled {
            return true;
        }
        let now = Instant::now();
        let mut entry = self.store.entry(key.to_string()).or_default();
        while let Some(front) = entry.front() {
            if now.duration_since(*front) >= window {
                entry.pop_front();
            } else {
                break;
            }
        }
        if entry.len() < limit {
            entry.push_back(now);
            true
        } else {
            false
        }
    }
}

/// Per-action limits derived from env.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub confession_limit: usize,
    pub confession_window: Duration,
    pub reply_limit: usize,
    pub reply_window: Duration,
    pub like_limit: usize,
    pub like_window: Duration,
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        fn usize_env(name: &str, default: usize) -> usize {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }
        fn dur_env(name: &str, default: u64) -> Duration {
            Duration::from_secs(
                std::env::var(name)
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(default),
            )
        }
        Self {
            confession_limit: usize_env("RL_CONFESSION_LIMIT", 3),
            confession_window: dur_env("RL_CONFESSION_WINDOW", 3600),
            reply_limit: usize_env("RL_REPLY_LIMIT", 20),
            reply_window: dur_env("RL_REPLY_WINDOW", 60),
            like_limit: usize_env("RL_LIKE_LIMIT", 60),
            like_window: dur_env("RL_LIKE_WINDOW", 60),
        }
    }
}

/// High level guard used by handlers.
#[derive(Clone)]
pub struct RateLimiterFacade {
    pub limiter: InMemoryRateLimiter,
    pub cfg: RateLimitConfig,
}

impl RateLimiterFacade {
    pub fn new(limiter: InMemoryRateLimiter, cfg: RateLimitConfig) -> Self {
        Self { limiter, cfg }
    }
    pub fn allow_confession(&self, mid: &str) -> bool {
        self.limiter.check(
            &format!("confession:{mid}"),
            self.cfg.confession_limit,
            self.cfg.confession_window,
        )
    }
    pub fn allow_reply(&self, mid: &str) -> bool {
        self.limiter
            .check(&format!("reply:{mid}"), self.cfg.reply_limit, self.cfg.reply_window)
    }
    pub fn allow_like(&self, mid: &str) -> bool {
        self.limiter
            .check(&format!("like:{mid}"), self.cfg.like_limit, self.cfg.like_window)
    }
}

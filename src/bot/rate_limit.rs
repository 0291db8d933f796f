//! Per-user token bucket gating how often commands may be invoked.

use dashmap::DashMap;
use serenity::model::id::UserId;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::task::JoinHandle;
use tracing::debug;

/// Buckets untouched for this long are dropped by the sweeper.
pub const INACTIVE_THRESHOLD: Duration = Duration::from_secs(300);
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_tokens: u32,
    pub refill_rate: u32,
    pub refill_interval: Duration,
    pub tokens_per_command: u32,
}

/// Burst of 5, then one command every 2 seconds.
impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_tokens: 5,
            refill_rate: 1,
            refill_interval: Duration::from_millis(2000),
            tokens_per_command: 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub limited: bool,
    pub retry_after: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub tokens: u32,
    pub max_tokens: u32,
    pub next_refill_in: Duration,
}

#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<UserId, Bucket>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    pub fn check(&self, user_id: UserId) -> RateLimitDecision {
        self.check_at(user_id, Instant::now())
    }

    /// Refills the user's bucket for the time elapsed up to `now`, then
    /// consumes one command's worth of tokens if available.
    ///
    /// A limited check does not consume anything.
    pub fn check_at(&self, user_id: UserId, now: Instant) -> RateLimitDecision {
        let cfg = self.config;
        let mut bucket = self.buckets.entry(user_id).or_insert(Bucket {
            tokens: cfg.max_tokens,
            last_refill: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_refill);
        let refills = (elapsed.as_millis() / cfg.refill_interval.as_millis().max(1)) as u32;
        if refills > 0 {
            bucket.tokens = cfg
                .max_tokens
                .min(bucket.tokens.saturating_add(refills.saturating_mul(cfg.refill_rate)));
            bucket.last_refill = now;
        }

        if bucket.tokens >= cfg.tokens_per_command {
            bucket.tokens -= cfg.tokens_per_command;
            return RateLimitDecision {
                limited: false,
                retry_after: Duration::ZERO,
            };
        }

        let missing = cfg.tokens_per_command - bucket.tokens;
        let refills_needed = missing.div_ceil(cfg.refill_rate.max(1));
        let since_refill = now.saturating_duration_since(bucket.last_refill);
        let retry_after = (cfg.refill_interval * refills_needed).saturating_sub(since_refill);

        RateLimitDecision {
            limited: true,
            retry_after: retry_after.max(Duration::from_millis(1)),
        }
    }

    /// Discards a user's bucket; their next command starts from a full one.
    // TODO: expose through an owner-only slash command.
    pub fn reset(&self, user_id: UserId) {
        self.buckets.remove(&user_id);
    }

    pub fn status(&self, user_id: UserId) -> RateLimitStatus {
        self.status_at(user_id, Instant::now())
    }

    pub fn status_at(&self, user_id: UserId, now: Instant) -> RateLimitStatus {
        let cfg = self.config;
        match self.buckets.get(&user_id) {
            Some(bucket) => RateLimitStatus {
                tokens: bucket.tokens,
                max_tokens: cfg.max_tokens,
                next_refill_in: cfg
                    .refill_interval
                    .saturating_sub(now.saturating_duration_since(bucket.last_refill)),
            },
            None => RateLimitStatus {
                tokens: cfg.max_tokens,
                max_tokens: cfg.max_tokens,
                next_refill_in: Duration::ZERO,
            },
        }
    }

    pub fn tracked_users(&self) -> usize {
        self.buckets.len()
    }

    /// Removes buckets whose last refill is older than `inactive`.
    pub fn sweep_at(&self, now: Instant, inactive: Duration) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_refill) <= inactive);
        before.saturating_sub(self.buckets.len())
    }

    /// Runs the inactive-bucket sweep for the lifetime of the process.
    pub fn spawn_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.tick().await;

            loop {
                interval.tick().await;
                let removed = self.sweep_at(Instant::now(), INACTIVE_THRESHOLD);
                if removed > 0 {
                    debug!(
                        "🧹 Rate limit: {} buckets inactivos eliminados, {} usuarios activos",
                        removed,
                        self.tracked_users()
                    );
                }
            }
        })
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

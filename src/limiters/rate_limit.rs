//! Storage backed rate limiter dispatching to the configured algorithm
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_futures::Instrument;

use super::{fixed_window, sliding_window, token_bucket, Algorithm, RateLimitDecision};
use crate::clock::Clock;
use crate::error::Result;
use crate::settings::RateLimitSettings;
use crate::storage::{self, Storage};

pub const DEFAULT_KEY_PREFIX: &str = "ratelimit:";

/// Each rate-limited key is stored under `prefix + key`. Checks for all keys
/// are serialized so that a read-modify-write of one entry never interleaves
/// with another.
pub struct RateLimiter {
    settings: RateLimitSettings,
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    prefix: String,
    lock: Mutex<()>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("settings", &self.settings)
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl RateLimiter {
    pub fn new(
        settings: RateLimitSettings,
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            storage,
            clock,
            prefix: DEFAULT_KEY_PREFIX.to_string(),
            lock: Mutex::new(()),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn settings(&self) -> &RateLimitSettings {
        &self.settings
    }

    pub fn algorithm(&self) -> Algorithm {
        self.settings.algorithm
    }

    fn storage_key(&self, key: &str, now: i64) -> String {
        match self.settings.algorithm {
            Algorithm::FixedWindow => format!(
                "{}{}",
                self.prefix,
                fixed_window::storage_key(key, now, self.settings.window_ms)
            ),
            _ => format!("{}{}", self.prefix, key),
        }
    }

    /// Count one request for `key` and report whether it may proceed.
    /// A failing storage backend admits the request.
    pub async fn check_limit(&self, key: &str) -> RateLimitDecision {
        let _guard = self.lock.lock().await;
        let now = self.clock.now_ms();
        let storage_key = self.storage_key(key, now);

        let result = match self.settings.algorithm {
            Algorithm::SlidingWindow => {
                self.apply(&storage_key, now, sliding_window::check).await
            }
            Algorithm::FixedWindow => self.apply(&storage_key, now, fixed_window::check).await,
            Algorithm::TokenBucket => self.apply(&storage_key, now, token_bucket::check).await,
        };

        match result {
            Ok(decision) => {
                if !decision.allowed {
                    debug!(
                        key = %key,
                        retry_after = ?decision.retry_after,
                        "Rate limit exceeded"
                    );
                }
                decision
            }
            Err(err) => {
                warn!(key = %key, "Rate limit storage unavailable, admitting request: {}", err);
                RateLimitDecision::allow(
                    self.settings.max_requests,
                    now + self.settings.window_ms as i64,
                )
            }
        }
    }

    async fn apply<E, F>(&self, storage_key: &str, now: i64, check: F) -> Result<RateLimitDecision>
    where
        E: Serialize + DeserializeOwned + Sync,
        F: Fn(Option<E>, &RateLimitSettings, i64) -> (E, RateLimitDecision),
    {
        let entry = storage::get_typed::<E>(self.storage.as_ref(), storage_key).await?;
        let (entry, decision) = check(entry, &self.settings, now);
        storage::set_typed(self.storage.as_ref(), storage_key, &entry).await?;
        Ok(decision)
    }

    /// Remaining allowance for `key` without counting a request
    pub async fn peek(&self, key: &str) -> Result<RateLimitDecision> {
        let now = self.clock.now_ms();
        let storage_key = self.storage_key(key, now);
        let storage = self.storage.as_ref();
        let decision = match self.settings.algorithm {
            Algorithm::SlidingWindow => {
                let entry = storage::get_typed(storage, &storage_key).await?;
                sliding_window::peek(entry.as_ref(), &self.settings, now)
            }
            Algorithm::FixedWindow => {
                let entry = storage::get_typed(storage, &storage_key).await?;
                fixed_window::peek(entry.as_ref(), &self.settings, now)
            }
            Algorithm::TokenBucket => {
                let bucket = storage::get_typed(storage, &storage_key).await?;
                token_bucket::peek(bucket.as_ref(), &self.settings, now)
            }
        };
        Ok(decision)
    }

    /// Drop the stored state for `key`
    pub async fn reset(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let storage_key = self.storage_key(key, self.clock.now_ms());
        self.storage.delete(&storage_key).await
    }

    /// Delete every entry whose reset time has passed. Returns how many were
    /// removed. Each entry is read and deleted under the check lock so a
    /// window opened concurrently is never swept.
    pub async fn expire_keys(&self) -> Result<usize> {
        let mut removed = 0;
        for key in self.storage.keys(&self.prefix).await? {
            let _guard = self.lock.lock().await;
            let now = self.clock.now_ms();
            let reset_time = self
                .storage
                .get(&key)
                .await?
                .and_then(|entry| entry.get("resetTime").and_then(|v| v.as_i64()));
            match reset_time {
                Some(reset_time) if now > reset_time => {
                    self.storage.delete(&key).await?;
                    removed += 1;
                }
                Some(_) => {}
                // unreadable entries would never expire on their own
                None => {
                    self.storage.delete(&key).await?;
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            debug!("Expired {} rate limit entries", removed);
        }
        Ok(removed)
    }

    /// Periodically expire stale entries until the handle is aborted
    pub fn spawn_expiry_task(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        let span = tracing::debug_span!("rate_limit_expiry");
        tokio::spawn(
            async move {
                let mut interval = tokio::time::interval(every);
                info!("Rate limit expiry loop started with {}ms interval", every.as_millis());
                loop {
                    interval.tick().await;
                    if let Err(err) = limiter.expire_keys().await {
                        warn!("Failed to expire rate limit entries: {}", err);
                    }
                }
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStorage;

    fn limiter(algorithm: Algorithm, clock: Arc<ManualClock>) -> (RateLimiter, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let limiter = RateLimiter::new(
            RateLimitSettings::new(2, 1000, algorithm),
            storage.clone(),
            clock,
        );
        (limiter, storage)
    }

    #[tokio::test]
    async fn sliding_window_denies_then_recovers() {
        let clock = Arc::new(ManualClock::new(10_000));
        let (limiter, _) = limiter(Algorithm::SlidingWindow, clock.clone());
        assert!(limiter.check_limit("a").await.allowed);
        assert!(limiter.check_limit("a").await.allowed);
        let denied = limiter.check_limit("a").await;
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Some(1000));
        // other keys are independent
        assert!(limiter.check_limit("b").await.allowed);

        clock.advance(1000);
        assert!(limiter.check_limit("a").await.allowed);
    }

    #[tokio::test]
    async fn fixed_window_uses_one_key_per_window() {
        let clock = Arc::new(ManualClock::new(10_500));
        let (limiter, storage) = limiter(Algorithm::FixedWindow, clock.clone());
        limiter.check_limit("a").await;
        assert!(storage.get("ratelimit:a:10000").await.unwrap().is_some());
        clock.set(11_000);
        limiter.check_limit("a").await;
        assert!(storage.get("ratelimit:a:11000").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn expire_keys_removes_only_stale_entries() {
        let clock = Arc::new(ManualClock::new(0));
        let (limiter, storage) = limiter(Algorithm::SlidingWindow, clock.clone());
        limiter.check_limit("old").await;
        clock.set(600);
        limiter.check_limit("new").await;
        storage.set("unrelated", serde_json::json!(1)).await.unwrap();

        clock.set(1001);
        assert_eq!(limiter.expire_keys().await.unwrap(), 1);
        assert!(storage.get("ratelimit:old").await.unwrap().is_none());
        assert!(storage.get("ratelimit:new").await.unwrap().is_some());
        assert!(storage.get("unrelated").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn peek_reports_remaining() {
        let clock = Arc::new(ManualClock::new(0));
        let (limiter, _) = limiter(Algorithm::TokenBucket, clock);
        assert_eq!(limiter.peek("a").await.unwrap().remaining, 2);
        limiter.check_limit("a").await;
        assert_eq!(limiter.peek("a").await.unwrap().remaining, 1);
        assert_eq!(limiter.peek("a").await.unwrap().remaining, 1);
    }
}
